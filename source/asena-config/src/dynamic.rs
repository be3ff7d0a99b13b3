//! Hot-reloadable routing configuration (`dynamic.yaml`).
//!
//! The file declares routers (rule + target service) and services (a load
//! balancer over upstream servers). Declaration order matters: routers are
//! evaluated first-match-wins in the order they appear, and the round-robin
//! rotation follows server order. Both maps are therefore order-preserving.
//!
//! Parsing, validation and defaulting together form one "accept" step: a file
//! that fails any of them rejects the whole update and the previous
//! configuration stays in effect.

use std::fs;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The only balancing algorithm supported so far.
pub const ROUND_ROBIN: &str = "round-robin";

pub const DEFAULT_FLASH_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SERVER_WEIGHT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub http: HttpSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    pub routers: IndexMap<String, RouterCfg>,
    pub services: IndexMap<String, ServiceCfg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterCfg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// A router without a service parses fine but never matches at dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCfg {
    pub load_balancer: LoadBalancerCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerCfg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub flash_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_host_header: Option<bool>,
    pub servers: Vec<ServerCfg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCfg {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl DynamicConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data, path)
    }

    pub fn parse(data: &[u8], path: &Path) -> Result<Self, ConfigError> {
        let mut cfg: DynamicConfig =
            serde_yaml::from_slice(data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        cfg.normalize();
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, service) in &self.http.services {
            let lb = &service.load_balancer;
            if lb.servers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service {name:?} must declare at least one server"
                )));
            }
            if let Some(algorithm) = &lb.algorithm {
                if algorithm != ROUND_ROBIN {
                    return Err(ConfigError::Invalid(format!(
                        "service {name:?} uses unsupported algorithm {algorithm:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fill unset fields from the defaults table.
    fn normalize(&mut self) {
        for service in self.http.services.values_mut() {
            let lb = &mut service.load_balancer;
            lb.algorithm.get_or_insert_with(|| ROUND_ROBIN.to_string());
            lb.flash_interval.get_or_insert(DEFAULT_FLASH_INTERVAL);
            lb.pass_host_header.get_or_insert(false);
            for server in &mut lb.servers {
                server.weight.get_or_insert(DEFAULT_SERVER_WEIGHT);
            }
        }
    }
}
