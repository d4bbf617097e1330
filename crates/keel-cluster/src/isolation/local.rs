use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keel_server::actor::{ActorHandle, ActorSystem};
use keel_server::RetryStrategy;
use log::debug;
use tokio::sync::{mpsc, Mutex};

use crate::driver::{Executor, ExecutorDriverActor, ExecutorDriverOptions, ExecutorEvent};
use crate::error::ClusterResult;
use crate::id::FrameworkId;
use crate::isolation::{ExecutorExit, IsolationModule};
use crate::message::FrameworkInfo;
use crate::net::Endpoint;
use crate::resource::Resources;

/// Builds the framework-side executor for a framework hosted in-process.
pub type ExecutorFactory = Arc<dyn Fn(FrameworkId) -> Box<dyn Executor> + Send + Sync>;

struct LocalIsolationState {
    system: ActorSystem,
    executors: HashMap<FrameworkId, ActorHandle<ExecutorDriverActor>>,
}

/// Runs executors inside the slave process, speaking the real executor
/// protocol over loopback. Used by local deployments and tests; the
/// executor-is-gone guarantee comes from watching the driver actor stop.
pub struct LocalIsolation {
    exits: mpsc::Sender<ExecutorExit>,
    factory: ExecutorFactory,
    state: Mutex<LocalIsolationState>,
}

impl LocalIsolation {
    pub fn new(exits: mpsc::Sender<ExecutorExit>, factory: ExecutorFactory) -> Self {
        Self {
            exits,
            factory,
            state: Mutex::new(LocalIsolationState {
                system: ActorSystem::new(),
                executors: HashMap::new(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl IsolationModule for LocalIsolation {
    async fn launch_executor(
        &self,
        slave: &Endpoint,
        framework_id: FrameworkId,
        _framework: &FrameworkInfo,
        _directory: &Path,
    ) -> ClusterResult<String> {
        let options = ExecutorDriverOptions {
            slave: slave.clone(),
            framework_id,
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            external_host: "127.0.0.1".to_string(),
            retry: RetryStrategy::Fixed {
                max_count: 5,
                delay: Duration::from_millis(100),
            },
            executor: (self.factory)(framework_id),
        };
        let mut state = self.state.lock().await;
        let handle = state.system.spawn::<ExecutorDriverActor>(options);
        state.executors.insert(framework_id, handle.clone());

        let exits = self.exits.clone();
        tokio::spawn(async move {
            handle.wait_for_stop().await;
            let _ = exits
                .send(ExecutorExit {
                    framework_id,
                    status: 0,
                })
                .await;
        });
        Ok("in-process".to_string())
    }

    async fn kill_executor(&self, framework_id: FrameworkId) -> ClusterResult<()> {
        let handle = self.state.lock().await.executors.remove(&framework_id);
        if let Some(handle) = handle {
            let _ = handle.send(ExecutorEvent::Shutdown).await;
        }
        Ok(())
    }

    async fn resources_changed(
        &self,
        framework_id: FrameworkId,
        resources: &Resources,
    ) -> ClusterResult<()> {
        debug!("framework {framework_id} now holds {resources} in-process");
        Ok(())
    }

    async fn stop(&self) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        let executors = state.executors.drain().collect::<Vec<_>>();
        for (_, handle) in executors {
            let _ = handle.send(ExecutorEvent::Shutdown).await;
        }
        state.system.join().await;
        Ok(())
    }
}
