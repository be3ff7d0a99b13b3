//! Inbound listeners and signal handling.

pub mod cert;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use http::{header, Response, StatusCode};
use pingora::apps::http_app::ServeHttp;
use pingora::listeners::tls::TlsSettings;
use pingora::protocols::http::ServerSession;
use pingora::services::listening::Service;
use tokio::signal::unix::{signal, SignalKind};

use asena_config::static_config::StaticConfig;

use crate::server::cert::{CertManager, TlsHandshake};

/// Attach the configured inbound listener to a listening service.
///
/// In HTTPS mode the certificate comes from the manager's handshake callback
/// rather than a fixed file pair, so SIGHUP reloads take effect on the next
/// handshake without touching the listener.
pub fn populate_listeners<T>(
    service: &mut Service<T>,
    cfg: &StaticConfig,
    cert_manager: Option<&Arc<CertManager>>,
) {
    let addr = bind_address(&cfg.listener.port);

    if cfg.listener.enable_https {
        let cert_manager = cert_manager
            .expect("HTTPS enabled without a certificate manager")
            .clone();
        let mut settings = TlsSettings::with_callbacks(Box::new(TlsHandshake(cert_manager)))
            .expect("adding TLS listener shouldn't fail");
        settings.enable_h2();
        service.add_tls_with_settings(&addr, None, settings);
    } else {
        service.add_tcp(&addr);
    }
}

/// Port suffixes like ":443" bind on all interfaces.
fn bind_address(port: &str) -> String {
    if port.starts_with(':') {
        format!("0.0.0.0{port}")
    } else {
        port.to_string()
    }
}

/// Answers every plaintext request on :80 with a redirect to the HTTPS
/// listener. Only used when HTTPS is enabled.
#[derive(Clone)]
pub struct RedirectToHttps;

#[async_trait]
impl ServeHttp for RedirectToHttps {
    async fn response(&self, session: &mut ServerSession) -> Response<Vec<u8>> {
        let req = session.req_header();
        let host = req
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let uri = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = format!("https://{host}{uri}");

        Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, location)
            .header(header::CONTENT_LENGTH, 0)
            .body(Vec::new())
            .expect("redirect response must build")
    }
}

pub fn redirect_service() -> Service<RedirectToHttps> {
    let mut service = Service::new("HTTPS Redirect".to_string(), RedirectToHttps);
    service.add_tcp("0.0.0.0:80");
    service
}

/// Reload the server certificate from disk on every SIGHUP. Signals arriving
/// while a reload is in flight coalesce into the next iteration, which reads
/// the then-current file contents.
pub fn spawn_cert_reload_on_sighup(
    cert_manager: Arc<CertManager>,
    cert_file: PathBuf,
    key_file: PathBuf,
) {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            tracing::info!("reloading TLS certificates");
            match cert_manager.load(&cert_file, &key_file) {
                Ok(()) => tracing::info!("TLS certificates reloaded"),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to reload TLS certificates, keeping previous")
                }
            }
        }
    });
}
