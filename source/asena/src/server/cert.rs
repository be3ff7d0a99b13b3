//! Server certificate management.
//!
//! The active certificate lives behind a reader/writer lock: every TLS
//! handshake reads it through the pingora accept callback, while reloads
//! (SIGHUP-triggered) replace it under the write lock. A failed reload
//! leaves the previous certificate serving.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use pingora::listeners::TlsAccept;
use pingora::tls::error::ErrorStack;
use pingora::tls::ext;
use pingora::tls::pkey::{PKey, Private};
use pingora::tls::ssl::SslRef;
use pingora::tls::x509::X509;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate file {path} not accessible: {source}")]
    CertFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key file {path} not accessible: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load certificate/key ({cert}, {key}): {source}")]
    Parse {
        cert: PathBuf,
        key: PathBuf,
        #[source]
        source: ErrorStack,
    },

    #[error("certificate file {0} contains no certificates")]
    EmptyCert(PathBuf),

    #[error("no TLS certificate loaded")]
    NotLoaded,
}

/// Leaf, intermediate chain, and private key as parsed from one PEM pair.
#[derive(Clone)]
pub struct LoadedCert {
    pub leaf: X509,
    pub chain: Vec<X509>,
    pub key: PKey<Private>,
}

pub struct CertManager {
    cert: RwLock<Option<LoadedCert>>,
}

impl CertManager {
    /// Loads the given pair eagerly. Empty paths produce an empty (but
    /// usable) manager whose `get` errors until `load` is called.
    pub fn new(cert_file: &Path, key_file: &Path) -> Result<Self, CertError> {
        let manager = Self {
            cert: RwLock::new(None),
        };
        if !cert_file.as_os_str().is_empty() && !key_file.as_os_str().is_empty() {
            manager.load(cert_file, key_file)?;
        }
        Ok(manager)
    }

    /// Parse the pair and replace the held certificate. On any error the
    /// previous certificate stays in place.
    pub fn load(&self, cert_file: &Path, key_file: &Path) -> Result<(), CertError> {
        let cert_pem = fs::read(cert_file).map_err(|source| CertError::CertFile {
            path: cert_file.to_path_buf(),
            source,
        })?;
        let key_pem = fs::read(key_file).map_err(|source| CertError::KeyFile {
            path: key_file.to_path_buf(),
            source,
        })?;

        let parse_err = |source| CertError::Parse {
            cert: cert_file.to_path_buf(),
            key: key_file.to_path_buf(),
            source,
        };
        let mut certs = X509::stack_from_pem(&cert_pem).map_err(parse_err)?;
        if certs.is_empty() {
            return Err(CertError::EmptyCert(cert_file.to_path_buf()));
        }
        let leaf = certs.remove(0);
        let key = PKey::private_key_from_pem(&key_pem).map_err(parse_err)?;

        let loaded = LoadedCert {
            leaf,
            chain: certs,
            key,
        };
        *self
            .cert
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(loaded);
        Ok(())
    }

    /// The currently held certificate. X509/PKey handles are reference
    /// counted, so the clone is cheap.
    pub fn get(&self) -> Result<LoadedCert, CertError> {
        self.cert
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CertError::NotLoaded)
    }
}

/// Adapter serving the managed certificate to each TLS handshake.
pub struct TlsHandshake(pub std::sync::Arc<CertManager>);

#[async_trait]
impl TlsAccept for TlsHandshake {
    async fn certificate_callback(&self, ssl: &mut SslRef) {
        match self.0.get() {
            Ok(cert) => {
                if let Err(err) = use_certificate(&cert, ssl) {
                    tracing::warn!(error = %err, "failed to apply certificate to handshake");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejecting TLS handshake");
            }
        }
    }
}

fn use_certificate(cert: &LoadedCert, ssl: &mut SslRef) -> Result<(), ErrorStack> {
    ext::ssl_use_certificate(ssl, &cert.leaf)?;
    ext::ssl_use_private_key(ssl, &cert.key)?;
    for link in &cert.chain {
        ext::ssl_add_chain_cert(ssl, link)?;
    }
    Ok(())
}
