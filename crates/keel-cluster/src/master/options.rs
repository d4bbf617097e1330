use std::time::Duration;

use keel_common::config::AppConfig;
use keel_server::RetryStrategy;

use crate::allocator::{create_allocator, Allocator};
use crate::election::ElectionBackend;
use crate::error::ClusterResult;
use crate::net::Endpoint;

pub struct MasterOptions {
    pub listen_host: String,
    pub port: u16,
    /// The host other agents use to reach the master.
    pub external_host: String,
    /// The allocation policy. [None] means the default simple policy.
    pub allocator: Option<Box<dyn Allocator>>,
    /// Where leadership observations come from. [None] means a
    /// single-master deployment where this master leads from the start.
    pub election: Option<ElectionBackend>,
    pub reconciliation_window: Duration,
    pub slave_heartbeat_timeout: Duration,
    pub retry: RetryStrategy,
}

impl MasterOptions {
    pub fn from_config(config: &AppConfig) -> ClusterResult<Self> {
        let allocator = create_allocator(&config.master.allocator)?;
        let endpoint = Endpoint::new(
            "master",
            config.master.external_host.clone(),
            config.master.port,
        );
        let election = config.master.fault_tolerant.as_deref().map(|locator| {
            ElectionBackend::from_config(
                Some(locator),
                endpoint,
                RetryStrategy::from(&config.rpc.retry_strategy),
            )
        });
        let reconciliation_window = if config.master.reconciliation_window_secs > 0 {
            Duration::from_secs(config.master.reconciliation_window_secs)
        } else {
            // The documented default: ten slave heartbeat intervals.
            Duration::from_secs(config.slave.heartbeat_interval_secs * 10)
        };
        Ok(Self {
            listen_host: config.master.listen_host.clone(),
            port: config.master.port,
            external_host: config.master.external_host.clone(),
            allocator: Some(allocator),
            election,
            reconciliation_window,
            slave_heartbeat_timeout: Duration::from_secs(
                config.master.slave_heartbeat_timeout_secs,
            ),
            retry: RetryStrategy::from(&config.rpc.retry_strategy),
        })
    }
}
