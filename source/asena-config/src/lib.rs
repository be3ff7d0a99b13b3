//! Configuration layer for the Asena reverse proxy.
//!
//! Two files drive the proxy. The *static* file (`asena.yaml`) is read once
//! at startup and holds listener addresses, TLS file paths, log sink settings
//! and outbound transport tunables. The *dynamic* file (`dynamic.yaml`) holds
//! routers and services and may be rewritten while the proxy is serving
//! traffic; the core re-reads and re-validates it on change.
//!
//! Both models follow the same convention: every field that may be omitted in
//! the file is an `Option` on the serde side, and an explicit defaulting pass
//! (`normalize`) resolves the omissions after parsing. This keeps "unset" and
//! "set to the default value" distinguishable until the defaults table has
//! been applied.

pub mod cli;
pub mod dynamic;
pub mod error;
pub mod static_config;
pub mod writer;

pub use error::ConfigError;
