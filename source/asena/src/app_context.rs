//! Application bootstrap.
//!
//! Everything that can fail fatally happens here, before the server starts
//! taking traffic: static config load, first dynamic config load, and the
//! first certificate load when HTTPS is enabled. After `ready()` the only
//! remaining failure modes are the degrade-and-keep-serving kind.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use pingora::server::configuration::{Opt as PingoraOpt, ServerConf as PingoraServerConf};
use pingora::server::Server;
use pingora::services::Service;
use tokio_util::sync::CancellationToken;

use asena_config::cli::Cli;
use asena_config::static_config::{StaticConfig, TransportConfig};

use crate::proxy;
use crate::proxy::manager::ProxyManager;
use crate::proxy::watcher::{self, DynamicSubscription};
use crate::server::{self, cert::CertManager};

pub struct AppContext {
    config: StaticConfig,
    manager: Arc<ProxyManager>,
    subscription: DynamicSubscription,
    cert_manager: Option<Arc<CertManager>>,
    cancel: CancellationToken,
    server: Server,
}

impl AppContext {
    pub async fn bootstrap() -> miette::Result<AppContext> {
        Self::bootstrap_with(Cli::parse()).await
    }

    pub async fn bootstrap_with(cli: Cli) -> miette::Result<AppContext> {
        let mut config = StaticConfig::load(&cli.config_file)
            .into_diagnostic()
            .wrap_err("failed to load static configuration")?;
        config.apply_cli(&cli);
        tracing::info!(
            port = %config.listener.port,
            https = config.listener.enable_https,
            "static configuration loaded"
        );

        let cancel = CancellationToken::new();
        let subscription = watcher::start(&cli.dynamic_file, cancel.clone())
            .into_diagnostic()
            .wrap_err("failed to load dynamic configuration")?;

        let manager = Arc::new(ProxyManager::new());
        manager.apply(&subscription.get(), &config.transport);

        let cert_manager = if config.listener.enable_https {
            let cert_manager = CertManager::new(
                &config.listener.tls_cert_file,
                &config.listener.tls_key_file,
            )
            .into_diagnostic()
            .wrap_err("failed to load TLS certificates")?;
            Some(Arc::new(cert_manager))
        } else {
            None
        };

        let server =
            Server::new_with_opt_and_conf(pingora_opt(), pingora_server_conf(&config));

        Ok(AppContext {
            config,
            manager,
            subscription,
            cert_manager,
            cancel,
            server,
        })
    }

    pub fn build_services(&self) -> Vec<Box<dyn Service>> {
        let mut services: Vec<Box<dyn Service>> = Vec::new();

        services.push(proxy::asena_proxy_service(
            self.manager.clone(),
            &self.config,
            self.cert_manager.as_ref(),
            &self.server,
        ));

        if self.config.listener.enable_https {
            services.push(Box::new(server::redirect_service()));
        }

        services
    }

    /// Split into the server that pingora will own and the background work
    /// that keeps running on the tokio runtime.
    pub fn ready(self) -> (Server, AppTasks) {
        let cert = self.cert_manager.map(|cert_manager| {
            (
                cert_manager,
                self.config.listener.tls_cert_file.clone(),
                self.config.listener.tls_key_file.clone(),
            )
        });

        (
            self.server,
            AppTasks {
                manager: self.manager,
                subscription: self.subscription,
                transport: self.config.transport,
                cert,
                cancel: self.cancel,
            },
        )
    }
}

/// Long-lived background work: drain the coalescing update channel into the
/// proxy manager, and reload certificates on SIGHUP.
pub struct AppTasks {
    manager: Arc<ProxyManager>,
    subscription: DynamicSubscription,
    transport: TransportConfig,
    cert: Option<(Arc<CertManager>, PathBuf, PathBuf)>,
    /// Cancelling this stops the config watcher.
    pub cancel: CancellationToken,
}

impl AppTasks {
    pub async fn run(mut self) {
        if let Some((cert_manager, cert_file, key_file)) = self.cert.take() {
            server::spawn_cert_reload_on_sighup(cert_manager, cert_file, key_file);
        }

        while let Some(cfg) = self.subscription.changed().await {
            tracing::info!("applying updated dynamic configuration");
            self.manager.apply(&cfg, &self.transport);
        }
    }
}

fn pingora_opt() -> PingoraOpt {
    PingoraOpt {
        upgrade: false,
        daemon: false,
        nocapture: false,
        test: false,
        conf: None,
    }
}

fn pingora_server_conf(config: &StaticConfig) -> PingoraServerConf {
    PingoraServerConf {
        // In-flight requests get this long to finish on SIGINT/SIGTERM.
        graceful_shutdown_timeout_seconds: Some(5),
        grace_period_seconds: Some(1),
        upstream_keepalive_pool_size: config.transport.max_idle_conn,
        ..PingoraServerConf::default()
    }
}
