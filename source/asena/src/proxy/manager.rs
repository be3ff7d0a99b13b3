//! Forwarding snapshots and the manager that publishes them.
//!
//! A [`ForwardingSnapshot`] is the complete routing state for one
//! configuration generation: the ordered router list and one forwarder bundle
//! per service. It is immutable after publish. [`ProxyManager::apply`]
//! replaces the whole snapshot with a single atomic pointer store, so a
//! request that loaded the pointer once sees a consistent view for its entire
//! lifetime, and a snapshot is freed only when the last in-flight request
//! drops its reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use asena_config::dynamic::{DynamicConfig, DEFAULT_FLASH_INTERVAL, ROUND_ROBIN};
use asena_config::static_config::TransportConfig;

use crate::proxy::balancer::{self, RoundRobin};
use crate::proxy::rules;

/// One router line, in declaration order.
#[derive(Debug, Clone)]
pub struct RouterEntry {
    pub name: String,
    pub rule: Option<String>,
    pub service: Option<String>,
}

/// Per-service forwarder bundle for one snapshot generation.
pub struct ServiceForwarder {
    pub name: String,
    pub balancer: RoundRobin,
    /// Ceiling on how long streamed response data may sit unflushed.
    pub flush_interval: Duration,
    pub pass_host_header: bool,
    /// Outbound tunables, shared by every forwarder of this generation.
    pub transport: Arc<TransportConfig>,
}

pub struct ForwardingSnapshot {
    routers: Vec<RouterEntry>,
    proxies: HashMap<String, Arc<ServiceForwarder>>,
}

impl ForwardingSnapshot {
    pub fn empty() -> Self {
        Self {
            routers: Vec::new(),
            proxies: HashMap::new(),
        }
    }

    /// Evaluate routers in declaration order against the request host.
    ///
    /// The first matching router decides: its service name is returned, or,
    /// if it has none, the request counts as unmatched. Routers whose rule
    /// fails to evaluate are skipped.
    pub fn match_router(&self, host: &str) -> Option<&str> {
        for router in &self.routers {
            let Some(rule) = router
                .rule
                .as_deref()
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
            else {
                continue;
            };

            match rules::evaluate(rule, host) {
                Ok(true) => {
                    if router.service.is_none() {
                        tracing::warn!(
                            router = %router.name,
                            rule,
                            "router matched but has no service"
                        );
                    }
                    return router.service.as_deref();
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(router = %router.name, rule, error = %err, "invalid rule");
                }
            }
        }
        None
    }

    pub fn proxy_for(&self, service: &str) -> Option<Arc<ServiceForwarder>> {
        self.proxies.get(service).cloned()
    }

    pub fn routers(&self) -> &[RouterEntry] {
        &self.routers
    }
}

/// Owner of the published snapshot pointer. Single writer (`apply`), any
/// number of lock-free readers.
pub struct ProxyManager {
    snapshot: ArcSwap<ForwardingSnapshot>,
}

impl Default for ProxyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyManager {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ForwardingSnapshot::empty()),
        }
    }

    /// The one atomic load of the hot path. Callers thread the returned
    /// reference through the whole request.
    pub fn snapshot(&self) -> Arc<ForwardingSnapshot> {
        self.snapshot.load_full()
    }

    /// Build a fresh snapshot from a validated configuration and publish it.
    ///
    /// Never fails: a service with unusable servers still gets an entry whose
    /// balancer has nothing to yield, which the dispatcher answers with 502.
    /// The previous snapshot is not torn down; in-flight requests keep their
    /// reference until they finish.
    pub fn apply(&self, cfg: &DynamicConfig, transport: &TransportConfig) {
        let transport = Arc::new(transport.clone());

        let mut proxies = HashMap::with_capacity(cfg.http.services.len());
        for (name, service) in &cfg.http.services {
            let lb = &service.load_balancer;
            let algorithm = lb.algorithm.as_deref().unwrap_or(ROUND_ROBIN);
            let forwarder = ServiceForwarder {
                name: name.clone(),
                balancer: balancer::build(algorithm, lb.servers.clone()),
                flush_interval: lb.flash_interval.unwrap_or(DEFAULT_FLASH_INTERVAL),
                pass_host_header: lb.pass_host_header.unwrap_or(false),
                transport: transport.clone(),
            };
            tracing::info!(
                service = %name,
                algorithm,
                servers = forwarder.balancer.server_count(),
                "reverse proxy built"
            );
            proxies.insert(name.clone(), Arc::new(forwarder));
        }

        let mut routers = Vec::with_capacity(cfg.http.routers.len());
        for (name, router) in &cfg.http.routers {
            if let Some(rule) = &router.rule {
                tracing::info!(router = %name, rule = %rule, "router registered");
            }
            routers.push(RouterEntry {
                name: name.clone(),
                rule: router.rule.clone(),
                service: router.service.clone(),
            });
        }

        self.snapshot.store(Arc::new(ForwardingSnapshot { routers, proxies }));
    }

    pub fn match_router(&self, host: &str) -> Option<String> {
        self.snapshot.load().match_router(host).map(str::to_string)
    }

    pub fn proxy_for(&self, service: &str) -> Option<Arc<ServiceForwarder>> {
        self.snapshot.load().proxy_for(service)
    }
}
