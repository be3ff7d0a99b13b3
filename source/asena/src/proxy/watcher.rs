//! Dynamic configuration file watching.
//!
//! Filesystem events on the dynamic file are debounced, re-read, validated
//! and content-hashed; only a change that survives all three is published.
//! Publication goes through a latest-wins single-slot channel
//! ([`tokio::sync::watch`]): the producer never blocks, and a slow consumer
//! only ever sees the most recent accepted configuration.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Event, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use asena_config::dynamic::DynamicConfig;
use asena_config::ConfigError;

/// Trailing debounce for bursts of filesystem events (editors tend to emit
/// several per save).
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

type ContentHash = [u8; 32];

/// Handle on the stream of accepted configurations.
pub struct DynamicSubscription {
    current: Arc<ArcSwap<DynamicConfig>>,
    updates: watch::Receiver<Arc<DynamicConfig>>,
}

impl DynamicSubscription {
    /// The most recently accepted configuration.
    pub fn get(&self) -> Arc<DynamicConfig> {
        self.current.load_full()
    }

    /// Wait for the next accepted configuration. Intermediate updates are
    /// coalesced away; only the latest is returned. `None` once the watcher
    /// has been cancelled.
    pub async fn changed(&mut self) -> Option<Arc<DynamicConfig>> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }
}

/// Load the dynamic file once (failure here is fatal to the caller), then
/// keep watching it in a background task until `cancel` fires.
///
/// Must be called from within a tokio runtime.
pub fn start(path: &Path, cancel: CancellationToken) -> Result<DynamicSubscription, ConfigError> {
    let data = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let initial = Arc::new(DynamicConfig::parse(&data, path)?);
    let initial_hash: ContentHash = Sha256::digest(&data).into();

    let current = Arc::new(ArcSwap::from(initial.clone()));
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(run(
        path.to_path_buf(),
        current.clone(),
        tx,
        cancel,
        initial_hash,
    ));

    Ok(DynamicSubscription {
        current,
        updates: rx,
    })
}

async fn run(
    path: PathBuf,
    current: Arc<ArcSwap<DynamicConfig>>,
    tx: watch::Sender<Arc<DynamicConfig>>,
    cancel: CancellationToken,
    mut last_hash: ContentHash,
) {
    let (fs_tx, mut fs_rx) = mpsc::channel::<()>(16);

    // Watch the containing directory and filter by name, so the file keeps
    // being watched across remove/recreate cycles.
    let file_name: Option<OsString> = path.file_name().map(OsString::from);
    let watch_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let mut watcher =
        match notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = event.kind.is_modify() || event.kind.is_create();
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == file_name.as_deref());
                if relevant && ours {
                    let _ = fs_tx.blocking_send(());
                }
            }
            Err(err) => tracing::error!(error = %err, "config watcher error"),
        }) {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::error!(error = %err, "failed to create config watcher");
                return;
            }
        };

    if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(error = %err, path = %watch_dir.display(), "failed to watch config directory");
        return;
    }
    tracing::info!(path = %path.display(), "watching dynamic configuration");

    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = fs_rx.recv() => {
                // Re-arm on every event; the reload runs once the burst ends.
                deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                deadline = None;
                last_hash = reload(&path, &current, &tx, last_hash);
            }
        }
    }

    tracing::info!(path = %path.display(), "dynamic configuration watcher stopped");
}

/// One reload attempt. Every failure keeps the previous configuration (and
/// its hash) in effect; content identical to the last accepted bytes is
/// dropped without publishing.
fn reload(
    path: &Path,
    current: &ArcSwap<DynamicConfig>,
    tx: &watch::Sender<Arc<DynamicConfig>>,
    last_hash: ContentHash,
) -> ContentHash {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            tracing::error!(error = %err, path = %path.display(), "failed to re-read dynamic configuration");
            return last_hash;
        }
    };

    let hash: ContentHash = Sha256::digest(&data).into();
    if hash == last_hash {
        return last_hash;
    }

    match DynamicConfig::parse(&data, path) {
        Ok(cfg) => {
            let cfg = Arc::new(cfg);
            current.store(cfg.clone());
            tx.send_replace(cfg);
            tracing::info!(path = %path.display(), "dynamic configuration reloaded");
            hash
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                path = %path.display(),
                "rejecting dynamic configuration update, keeping previous"
            );
            last_hash
        }
    }
}
