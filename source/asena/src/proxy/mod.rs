//! Request dispatch and forwarding.
//!
//! Each request loads the published forwarding snapshot exactly once (in
//! `new_ctx`) and threads that reference through every proxy phase, so a
//! configuration swap mid-request cannot produce a torn view. Router
//! matching, upstream selection and URL resolution all happen in the
//! request-filter phase; everything that can go wrong there degrades to a
//! 404 or a 502 written directly downstream.

pub mod balancer;
pub mod manager;
pub mod rules;
pub mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, StatusCode};
use pingora::prelude::HttpPeer;
use pingora::protocols::ALPN;
use pingora::server::Server;
use pingora::{Error, ErrorType, Result};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{FailToProxy, ProxyHttp, Session};
use thiserror::Error as ThisError;
use url::Url;

use asena_config::static_config::StaticConfig;

use crate::proxy::manager::{ForwardingSnapshot, ProxyManager, ServiceForwarder};
use crate::server::{self, cert::CertManager};

const NOT_FOUND_BODY: &str = "404 page not found";

pub struct AsenaProxyService {
    manager: Arc<ProxyManager>,
}

/// Create the proxy listening service with the configured inbound listener.
pub fn asena_proxy_service(
    manager: Arc<ProxyManager>,
    cfg: &StaticConfig,
    cert_manager: Option<&Arc<CertManager>>,
    server: &Server,
) -> Box<dyn pingora::services::Service> {
    let mut service = pingora_proxy::http_proxy_service_with_name(
        &server.configuration,
        AsenaProxyService { manager },
        "asena-proxy",
    );
    server::populate_listeners(&mut service, cfg, cert_manager);
    Box::new(service)
}

/// Upstream pick for one request, resolved during the request-filter phase.
struct SelectedTarget {
    addr: SocketAddr,
    tls: bool,
    /// Authority for Host-header rewriting, port included only when the URL
    /// spelled one out.
    host_port: String,
    sni: String,
}

pub struct AsenaContext {
    snapshot: Arc<ForwardingSnapshot>,
    forwarder: Option<Arc<ServiceForwarder>>,
    target: Option<SelectedTarget>,
    started: Instant,
}

#[async_trait]
impl ProxyHttp for AsenaProxyService {
    type CTX = AsenaContext;

    fn new_ctx(&self) -> Self::CTX {
        AsenaContext {
            snapshot: self.manager.snapshot(),
            forwarder: None,
            target: None,
            started: Instant::now(),
        }
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        let snapshot = ctx.snapshot.clone();
        let host = request_host(session.req_header());

        let Some(service) = snapshot.match_router(&host) else {
            tracing::warn!(
                host = %host,
                path = %session.req_header().uri.path(),
                "no router matched"
            );
            respond_not_found(session).await?;
            return Ok(true);
        };

        let Some(forwarder) = snapshot.proxy_for(service) else {
            tracing::warn!(service, "no routing rule found for service");
            respond_not_found(session).await?;
            return Ok(true);
        };

        let upstream_url = match forwarder.balancer.next() {
            Some(server) => server.url.clone(),
            None => {
                tracing::warn!(service = %forwarder.name, "no upstream server available");
                respond_bad_gateway(session).await?;
                return Ok(true);
            }
        };

        match resolve_target(&upstream_url).await {
            Ok(target) => {
                ctx.target = Some(target);
                ctx.forwarder = Some(forwarder);
                Ok(false)
            }
            Err(err) => {
                tracing::warn!(
                    service = %forwarder.name,
                    url = %upstream_url,
                    error = %err,
                    "unusable upstream server URL"
                );
                respond_bad_gateway(session).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let (Some(forwarder), Some(target)) = (&ctx.forwarder, &ctx.target) else {
            return Err(Error::explain(
                ErrorType::HTTPStatus(502),
                "no upstream target selected",
            ));
        };

        let mut peer = HttpPeer::new(target.addr, target.tls, target.sni.clone());
        let transport = forwarder.transport.as_ref();
        peer.options.connection_timeout = Some(transport.dial_timeout);
        peer.options.total_connection_timeout =
            Some(transport.dial_timeout + transport.tls_handshake_timeout);
        peer.options.idle_timeout = Some(transport.idle_conn_timeout);
        if target.tls {
            peer.options.alpn = if transport.force_http2 {
                ALPN::H2H1
            } else {
                ALPN::H1
            };
        }

        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let (Some(forwarder), Some(target)) = (&ctx.forwarder, &ctx.target) else {
            return Ok(());
        };

        // The client's Host header travels through untouched unless the
        // service asks for the upstream's own.
        if forwarder.pass_host_header {
            upstream_request.insert_header(header::HOST, target.host_port.clone())?;
        }

        Ok(())
    }

    fn upstream_response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        upstream_response.insert_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")?;
        upstream_response.insert_header(header::X_FRAME_OPTIONS, "DENY")?;

        if upstream_response.status.as_u16() >= 400 {
            let service = ctx
                .forwarder
                .as_deref()
                .map(|forwarder| forwarder.name.as_str())
                .unwrap_or("-");
            tracing::warn!(
                status = upstream_response.status.as_u16(),
                service,
                "proxy response error"
            );
        }

        Ok(())
    }

    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy {
        let service = ctx
            .forwarder
            .as_deref()
            .map(|forwarder| forwarder.name.as_str())
            .unwrap_or("-");
        tracing::warn!(service, error = %e, "upstream request failed");

        if let Err(err) = respond_bad_gateway(session).await {
            tracing::warn!(error = %err, "failed to write 502 response");
        }

        FailToProxy {
            error_code: 502,
            can_reuse_downstream: false,
        }
    }

    async fn logging(&self, session: &mut Session, _e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(0);
        let remote_addr = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        tracing::info!(
            method = %session.req_header().method,
            path = %session.req_header().uri.path(),
            status,
            remote_addr,
            latency_ms = ctx.started.elapsed().as_millis() as u64,
            "incoming request"
        );
    }
}

/// Request host for rule matching: Host header first, then the URI
/// authority (HTTP/2 requests carry it there).
fn request_host(req: &RequestHeader) -> String {
    if let Some(host) = req
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        if !host.is_empty() {
            return host.to_string();
        }
    }
    req.uri
        .authority()
        .map(|authority| authority.as_str().to_string())
        .unwrap_or_default()
}

#[derive(Debug, ThisError)]
enum TargetError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}")]
    Scheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("failed to resolve {0}: {1}")]
    Resolve(String, #[source] std::io::Error),
    #[error("{0} did not resolve to any address")]
    NoAddress(String),
}

async fn resolve_target(raw: &str) -> std::result::Result<SelectedTarget, TargetError> {
    let url = Url::parse(raw)?;

    let tls = match url.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(TargetError::Scheme(other.to_string())),
    };

    let host = url.host_str().ok_or(TargetError::MissingHost)?.to_string();
    let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
    let host_port = match url.port() {
        Some(explicit) => format!("{host}:{explicit}"),
        None => host.clone(),
    };

    let addr = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|err| TargetError::Resolve(host.clone(), err))?
        .next()
        .ok_or_else(|| TargetError::NoAddress(host.clone()))?;

    Ok(SelectedTarget {
        addr,
        tls,
        host_port,
        sni: host,
    })
}

async fn respond_not_found(session: &mut Session) -> Result<()> {
    let mut header = ResponseHeader::build(StatusCode::NOT_FOUND, Some(2))?;
    header.insert_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")?;
    header.insert_header(header::CONTENT_LENGTH, NOT_FOUND_BODY.len().to_string())?;

    session
        .downstream_session
        .write_response_header(Box::new(header))
        .await?;
    session
        .downstream_session
        .write_response_body(Bytes::from_static(NOT_FOUND_BODY.as_bytes()), true)
        .await
}

async fn respond_bad_gateway(session: &mut Session) -> Result<()> {
    let body = bad_gateway_body();
    let mut header = ResponseHeader::build(StatusCode::BAD_GATEWAY, Some(4))?;
    header.insert_header(header::CONTENT_TYPE, "application/json")?;
    header.insert_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")?;
    header.insert_header(header::X_FRAME_OPTIONS, "DENY")?;
    header.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;

    session
        .downstream_session
        .write_response_header(Box::new(header))
        .await?;
    session
        .downstream_session
        .write_response_body(body, true)
        .await
}

fn bad_gateway_body() -> Bytes {
    let body = serde_json::json!({
        "error": "Service not available",
        "code": 502,
        "message": "Please try again later.",
    });
    Bytes::from(body.to_string())
}
