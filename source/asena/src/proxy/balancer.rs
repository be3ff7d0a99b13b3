//! Upstream selection.

use std::sync::atomic::{AtomicU64, Ordering};

use asena_config::dynamic::{ServerCfg, ROUND_ROBIN};

/// Equal-weight round-robin over the servers of one service.
///
/// One instance lives inside each snapshot generation; the rotation counter
/// dies with the snapshot. `next` is safe under any number of concurrent
/// callers, the counter being the only shared state.
pub struct RoundRobin {
    servers: Vec<ServerCfg>,
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new(servers: Vec<ServerCfg>) -> Self {
        Self {
            servers,
            counter: AtomicU64::new(0),
        }
    }

    /// Pick the next server. `None` means no upstream is available.
    ///
    /// The counter is bumped before indexing, so a fresh balancer yields
    /// `servers[1 % len]` first. Existing deployments depend on that order;
    /// keep it.
    pub fn next(&self) -> Option<&ServerCfg> {
        let len = self.servers.len() as u64;
        if len == 0 {
            return None;
        }

        let pos = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Some(&self.servers[(pos % len) as usize])
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

/// Algorithm dispatch. Unrecognized names fall back to round-robin rather
/// than rejecting the service.
pub fn build(algorithm: &str, servers: Vec<ServerCfg>) -> RoundRobin {
    if algorithm != ROUND_ROBIN {
        tracing::warn!(
            algorithm,
            "unknown balancing algorithm, falling back to round-robin"
        );
    }
    RoundRobin::new(servers)
}
