use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keel_common::config::AppConfig;
use keel_server::RetryStrategy;
use tokio::sync::mpsc;

use crate::election::ElectionBackend;
use crate::error::ClusterResult;
use crate::isolation::{ExecutorExit, IsolationModule};
use crate::net::Endpoint;
use crate::resource::Resources;

pub struct SlaveOptions {
    pub listen_host: String,
    pub port: u16,
    pub external_host: String,
    pub hostname: String,
    /// The advertised total; never changes at runtime.
    pub resources: Resources,
    pub work_dir: PathBuf,
    pub isolation: Arc<dyn IsolationModule>,
    /// The receiving end of the isolation module's exit channel.
    pub executor_exits: Option<mpsc::Receiver<ExecutorExit>>,
    /// The master for single-master deployments; ignored when
    /// `election` is set.
    pub master: Endpoint,
    pub election: Option<ElectionBackend>,
    pub executor_registration_timeout: Duration,
    pub kill_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub retry: RetryStrategy,
}

impl SlaveOptions {
    pub fn from_config(
        config: &AppConfig,
        isolation: Arc<dyn IsolationModule>,
        executor_exits: mpsc::Receiver<ExecutorExit>,
    ) -> ClusterResult<Self> {
        let master = config.slave.master.parse::<Endpoint>()?;
        let retry = RetryStrategy::from(&config.rpc.retry_strategy);
        let election = config.slave.fault_tolerant.as_deref().map(|locator| {
            ElectionBackend::from_config(Some(locator), master.clone(), retry.clone())
        });
        let hostname = if config.slave.hostname.is_empty() {
            config.slave.external_host.clone()
        } else {
            config.slave.hostname.clone()
        };
        Ok(Self {
            listen_host: config.slave.listen_host.clone(),
            port: config.slave.port,
            external_host: config.slave.external_host.clone(),
            hostname,
            resources: config.slave.resources.parse()?,
            work_dir: PathBuf::from(&config.slave.work_dir),
            isolation,
            executor_exits: Some(executor_exits),
            master,
            election,
            executor_registration_timeout: Duration::from_secs(
                config.slave.executor_registration_timeout_secs,
            ),
            kill_timeout: Duration::from_secs(config.slave.kill_timeout_secs),
            heartbeat_interval: Duration::from_secs(config.slave.heartbeat_interval_secs),
            retry,
        })
    }
}
