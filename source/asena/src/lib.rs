//! Asena, a dynamically reconfigurable HTTP/HTTPS reverse proxy.
//!
//! The hot path never takes a lock: the forwarding table lives in an
//! atomically swapped immutable snapshot ([`proxy::manager`]), rebuilt by a
//! background task whenever the dynamic configuration file changes
//! ([`proxy::watcher`]). TLS handshakes read the active server certificate
//! through the same swap-under-readers principle ([`server::cert`]).

pub mod app_context;
pub mod proxy;
pub mod server;
