use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::config::deserialize_non_empty_string;
use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub master: MasterConfig,
    pub slave: SlaveConfig,
    pub rpc: RpcConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .merge(Env::prefixed("KEEL_").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub listen_host: String,
    pub port: u16,
    /// The host other agents use to reach the master.
    pub external_host: String,
    pub allocator: String,
    /// Locator of the external election service.
    /// When absent, the deployment runs a single non-fault-tolerant master.
    #[serde(deserialize_with = "deserialize_non_empty_string")]
    pub fault_tolerant: Option<String>,
    /// Length of the post-failover reconciliation window.
    /// Zero means ten times the slave heartbeat interval.
    pub reconciliation_window_secs: u64,
    pub slave_heartbeat_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub listen_host: String,
    /// The slave listen port. Zero asks the operating system for a free port;
    /// the slave learns its own identity before registering.
    pub port: u16,
    pub external_host: String,
    /// The master endpoint for single-master deployments,
    /// ignored when `fault_tolerant` is set.
    pub master: String,
    #[serde(deserialize_with = "deserialize_non_empty_string")]
    pub fault_tolerant: Option<String>,
    /// Advertised hostname; empty means the external host.
    pub hostname: String,
    pub work_dir: String,
    pub isolation: String,
    pub resources: String,
    pub executor_registration_timeout_secs: u64,
    pub kill_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay_secs: u64,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay_secs: u64,
        max_delay_secs: u64,
        factor: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.master.allocator, "simple");
        assert!(config.master.fault_tolerant.is_none());
        assert!(matches!(
            config.rpc.retry_strategy,
            RetryStrategy::Fixed { .. }
        ));
    }
}
