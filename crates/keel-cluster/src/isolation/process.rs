use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{ClusterError, ClusterResult};
use crate::id::FrameworkId;
use crate::isolation::{ExecutorExit, IsolationModule};
use crate::message::FrameworkInfo;
use crate::net::Endpoint;
use crate::resource::Resources;

/// Environment variables handed to forked executors so the executor
/// driver can find its way back to the slave.
pub const ENV_SLAVE_ENDPOINT: &str = "KEEL_SLAVE";
pub const ENV_FRAMEWORK_ID: &str = "KEEL_FRAMEWORK_ID";
pub const ENV_WORK_DIR: &str = "KEEL_WORK_DIR";

/// Runs each executor as a forked child process. The child is reaped by
/// a dedicated task that reports the exit upward exactly once.
pub struct ProcessIsolation {
    exits: mpsc::Sender<ExecutorExit>,
    running: Arc<Mutex<HashMap<FrameworkId, oneshot::Sender<()>>>>,
}

impl ProcessIsolation {
    pub fn new(exits: mpsc::Sender<ExecutorExit>) -> Self {
        Self {
            exits,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait::async_trait]
impl IsolationModule for ProcessIsolation {
    async fn launch_executor(
        &self,
        slave: &Endpoint,
        framework_id: FrameworkId,
        framework: &FrameworkInfo,
        directory: &Path,
    ) -> ClusterResult<String> {
        if framework.executor.uri.is_empty() {
            return Err(ClusterError::InvalidArgument(format!(
                "framework {framework_id} has no executor command"
            )));
        }
        tokio::fs::create_dir_all(directory).await?;
        let mut child = Command::new(&framework.executor.uri)
            .current_dir(directory)
            .env(ENV_SLAVE_ENDPOINT, slave.to_string())
            .env(ENV_FRAMEWORK_ID, framework_id.to_string())
            .env(ENV_WORK_DIR, directory)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClusterError::InvalidArgument(format!(
                    "failed to launch executor {}: {e}",
                    framework.executor.uri
                ))
            })?;
        let pid = child.id();
        info!(
            "launched executor for framework {framework_id} (pid {:?})",
            pid
        );

        let (kill_tx, mut kill_rx) = oneshot::channel();
        self.running.lock().await.insert(framework_id, kill_tx);
        let exits = self.exits.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let status = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("failed to reap executor for framework {framework_id}: {e}");
                    -1
                }
            };
            running.lock().await.remove(&framework_id);
            let _ = exits
                .send(ExecutorExit {
                    framework_id,
                    status,
                })
                .await;
        });
        Ok(match pid {
            Some(pid) => format!("pid {pid}"),
            None => "exited".to_string(),
        })
    }

    async fn kill_executor(&self, framework_id: FrameworkId) -> ClusterResult<()> {
        if let Some(kill) = self.running.lock().await.remove(&framework_id) {
            let _ = kill.send(());
        }
        Ok(())
    }

    async fn resources_changed(
        &self,
        framework_id: FrameworkId,
        resources: &Resources,
    ) -> ClusterResult<()> {
        // The process backend enforces no limits.
        debug!("framework {framework_id} now holds {resources} on this slave");
        Ok(())
    }

    async fn stop(&self) -> ClusterResult<()> {
        let mut running = self.running.lock().await;
        for (framework_id, kill) in running.drain() {
            debug!("killing executor for framework {framework_id}");
            let _ = kill.send(());
        }
        Ok(())
    }
}
