//! Startup-only configuration (`asena.yaml`).
//!
//! Everything in here is resolved once during bootstrap and handed to the
//! core as an immutable value. Fields omitted in the file are filled from the
//! defaults table below; the raw serde structs keep them as `Option` so that
//! "unset" survives until [`StaticConfig::from_raw`] runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::ConfigError;

pub const PORT_HTTP: &str = ":80";
pub const PORT_HTTPS: &str = ":443";

const DEFAULT_CERT_FILE: &str = "/etc/letsencrypt/live/example.com/cert.pem";
const DEFAULT_KEY_FILE: &str = "/etc/letsencrypt/live/example.com/privkey.pem";

const DEFAULT_LOG_PATH: &str = "access.log";
const DEFAULT_LOG_MAX_SIZE_MB: u64 = 100;
const DEFAULT_LOG_MAX_BACKUPS: u32 = 7;
const DEFAULT_LOG_MAX_AGE_DAYS: u32 = 30;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DIAL_KEEPALIVE: Duration = Duration::from_secs(30);
const DEFAULT_MAX_IDLE_CONN: usize = 100;
const DEFAULT_MAX_IDLE_CONN_PER_HOST: usize = 10;
const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Minimum TLS version offered to upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

//
// Raw (file-shaped) structs. All fields optional.
//

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawStaticConfig {
    pub asena: Option<RawListenerSection>,
    pub log: Option<RawLogSection>,
    pub proxy_transport: Option<RawTransportSection>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawListenerSection {
    pub enable_https: Option<bool>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawLogSection {
    pub lumberjack: Option<RawLumberjackSection>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawLumberjackSection {
    pub path: Option<PathBuf>,
    pub max_size: Option<u64>,
    pub max_backups: Option<u32>,
    pub max_age: Option<u32>,
    pub compress: Option<bool>,
}

// The file keeps the historical "dail_*" key spelling.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawTransportSection {
    #[serde(default, with = "humantime_serde")]
    pub dail_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub dail_keepalive: Option<Duration>,
    pub force_http2: Option<bool>,
    pub max_idle_conn: Option<usize>,
    pub max_idle_conn_per_host: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub idle_conn_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub tls_handshake_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub expect_continue_timeout: Option<Duration>,
    pub tls_min_version: Option<TlsVersion>,
}

//
// Resolved structs. No options left.
//

#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub listener: ListenerSettings,
    pub log: LogSettings,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub enable_https: bool,
    /// Bind address suffix, e.g. ":443".
    pub port: String,
    pub tls_cert_file: PathBuf,
    pub tls_key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub path: PathBuf,
    pub max_size: u64,
    pub max_backups: u32,
    pub max_age: u32,
    pub compress: bool,
}

/// Tunables for the outbound connections shared by every forwarder of a
/// snapshot generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub dial_timeout: Duration,
    pub dial_keepalive: Duration,
    pub force_http2: bool,
    pub max_idle_conn: usize,
    pub max_idle_conn_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub tls_min_version: TlsVersion,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            dial_keepalive: DEFAULT_DIAL_KEEPALIVE,
            force_http2: true,
            max_idle_conn: DEFAULT_MAX_IDLE_CONN,
            max_idle_conn_per_host: DEFAULT_MAX_IDLE_CONN_PER_HOST,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            expect_continue_timeout: DEFAULT_EXPECT_CONTINUE_TIMEOUT,
            tls_min_version: TlsVersion::Tls12,
        }
    }
}

impl StaticConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawStaticConfig =
            serde_yaml::from_slice(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_raw(raw))
    }

    /// The defaulting pass. Every `None` is replaced from the defaults table;
    /// the listening port follows `enable_https` unless the CLI later
    /// overrides it.
    pub fn from_raw(raw: RawStaticConfig) -> Self {
        let listener = raw.asena.unwrap_or_default();
        let enable_https = listener.enable_https.unwrap_or(false);
        let port = if enable_https { PORT_HTTPS } else { PORT_HTTP };

        let lumberjack = raw.log.unwrap_or_default().lumberjack.unwrap_or_default();
        let transport = raw.proxy_transport.unwrap_or_default();
        let transport_defaults = TransportConfig::default();

        Self {
            listener: ListenerSettings {
                enable_https,
                port: port.to_string(),
                tls_cert_file: listener
                    .tls_cert_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_FILE)),
                tls_key_file: listener
                    .tls_key_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE)),
            },
            log: LogSettings {
                path: lumberjack
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
                max_size: lumberjack.max_size.unwrap_or(DEFAULT_LOG_MAX_SIZE_MB),
                max_backups: lumberjack.max_backups.unwrap_or(DEFAULT_LOG_MAX_BACKUPS),
                max_age: lumberjack.max_age.unwrap_or(DEFAULT_LOG_MAX_AGE_DAYS),
                compress: lumberjack.compress.unwrap_or(true),
            },
            transport: TransportConfig {
                dial_timeout: transport
                    .dail_timeout
                    .unwrap_or(transport_defaults.dial_timeout),
                dial_keepalive: transport
                    .dail_keepalive
                    .unwrap_or(transport_defaults.dial_keepalive),
                force_http2: transport
                    .force_http2
                    .unwrap_or(transport_defaults.force_http2),
                max_idle_conn: transport
                    .max_idle_conn
                    .unwrap_or(transport_defaults.max_idle_conn),
                max_idle_conn_per_host: transport
                    .max_idle_conn_per_host
                    .unwrap_or(transport_defaults.max_idle_conn_per_host),
                idle_conn_timeout: transport
                    .idle_conn_timeout
                    .unwrap_or(transport_defaults.idle_conn_timeout),
                tls_handshake_timeout: transport
                    .tls_handshake_timeout
                    .unwrap_or(transport_defaults.tls_handshake_timeout),
                expect_continue_timeout: transport
                    .expect_continue_timeout
                    .unwrap_or(transport_defaults.expect_continue_timeout),
                tls_min_version: transport
                    .tls_min_version
                    .unwrap_or(transport_defaults.tls_min_version),
            },
        }
    }

    /// CLI flags win over file values. The port flag that applies is the one
    /// matching the serving mode.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if self.listener.enable_https {
            if let Some(port) = &cli.https_port {
                self.listener.port = port.clone();
            }
        } else if let Some(port) = &cli.http_port {
            self.listener.port = port.clone();
        }
        if let Some(cert_file) = &cli.cert_file {
            self.listener.tls_cert_file = cert_file.clone();
        }
        if let Some(key_file) = &cli.key_file {
            self.listener.tls_key_file = key_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn load_from_str(content: &str) -> StaticConfig {
        let mut file = NamedTempFile::new().expect("Failed to create temp config file");
        write!(file, "{content}").expect("Failed to write temp config");
        StaticConfig::load(file.path()).expect("Failed to load static config")
    }

    #[test]
    fn defaults_fill_empty_sections() {
        let cfg = load_from_str(
            r#"
asena: {}
log:
  lumberjack: {}
proxy_transport: {}
"#,
        );

        assert!(!cfg.listener.enable_https);
        assert_eq!(cfg.listener.port, PORT_HTTP);
        assert_eq!(cfg.transport.max_idle_conn, 100);
        assert_eq!(cfg.transport.dial_timeout, Duration::from_secs(30));
        assert_eq!(cfg.transport.tls_min_version, TlsVersion::Tls12);
        assert_eq!(cfg.log.max_backups, 7);
        assert!(cfg.log.compress);
    }

    #[test]
    fn https_flips_default_port() {
        let cfg = load_from_str(
            r#"
asena:
  enable_https: true
  tls_cert_file: "mycert.pem"
  tls_key_file: "mykey.pem"
"#,
        );

        assert_eq!(cfg.listener.port, PORT_HTTPS);
        assert_eq!(cfg.listener.tls_cert_file, PathBuf::from("mycert.pem"));
        assert_eq!(cfg.listener.tls_key_file, PathBuf::from("mykey.pem"));
    }

    #[test]
    fn transport_overrides_survive() {
        let cfg = load_from_str(
            r#"
proxy_transport:
  dail_timeout: 5s
  force_http2: false
  max_idle_conn: 42
  tls_min_version: "1.3"
"#,
        );

        assert_eq!(cfg.transport.dial_timeout, Duration::from_secs(5));
        assert!(!cfg.transport.force_http2);
        assert_eq!(cfg.transport.max_idle_conn, 42);
        assert_eq!(cfg.transport.tls_min_version, TlsVersion::Tls13);
        // untouched keys still defaulted
        assert_eq!(cfg.transport.idle_conn_timeout, Duration::from_secs(90));
    }

    #[test]
    fn cli_overrides_port_for_active_mode() {
        let mut cfg = load_from_str("asena: {}\n");
        let cli = Cli {
            config_file: PathBuf::new(),
            dynamic_file: PathBuf::new(),
            http_port: Some(":8080".to_string()),
            https_port: Some(":8443".to_string()),
            cert_file: None,
            key_file: None,
        };

        cfg.apply_cli(&cli);
        assert_eq!(cfg.listener.port, ":8080");

        let mut cfg = load_from_str("asena:\n  enable_https: true\n");
        cfg.apply_cli(&cli);
        assert_eq!(cfg.listener.port, ":8443");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = StaticConfig::load(Path::new("does-not-exist.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
