mod local;
mod process;

pub use local::{ExecutorFactory, LocalIsolation};
pub use process::{
    ProcessIsolation, ENV_FRAMEWORK_ID, ENV_SLAVE_ENDPOINT, ENV_WORK_DIR,
};

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{ClusterError, ClusterResult};
use crate::id::FrameworkId;
use crate::message::FrameworkInfo;
use crate::net::Endpoint;
use crate::resource::Resources;

const EXIT_CHANNEL_SIZE: usize = 16;

/// Reported exactly once per successfully launched executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorExit {
    pub framework_id: FrameworkId,
    pub status: i32,
}

/// The channel through which backends report executor exits. The slave
/// pumps the receiving end into its own message loop.
pub fn exit_channel() -> (mpsc::Sender<ExecutorExit>, mpsc::Receiver<ExecutorExit>) {
    mpsc::channel(EXIT_CHANNEL_SIZE)
}

/// Launches and contains executor processes on behalf of the slave.
/// Backends must make "executor is gone" observable within a bounded
/// time of the underlying process dying; the slave relies on the exit
/// report to declare its tasks lost.
#[async_trait::async_trait]
pub trait IsolationModule: Send + Sync + 'static {
    /// Launch an executor for the framework with `directory` as its
    /// working directory. Returns an opaque status string describing
    /// the launched executor (e.g. a pid).
    async fn launch_executor(
        &self,
        slave: &Endpoint,
        framework_id: FrameworkId,
        framework: &FrameworkInfo,
        directory: &Path,
    ) -> ClusterResult<String>;

    /// Kill the framework's executor. A missing executor is not an
    /// error; the exit may already be in flight.
    async fn kill_executor(&self, framework_id: FrameworkId) -> ClusterResult<()>;

    /// A hint that the resources granted to the framework on this slave
    /// changed; backends may tighten or relax enforced limits.
    async fn resources_changed(
        &self,
        framework_id: FrameworkId,
        resources: &Resources,
    ) -> ClusterResult<()>;

    /// Kill all executors on a best-effort basis during slave shutdown.
    async fn stop(&self) -> ClusterResult<()>;
}

/// Build the isolation backend named in the configuration.
/// The in-process backend requires an executor factory and is wired up
/// programmatically rather than by name.
pub fn create_isolation(
    kind: &str,
    exits: mpsc::Sender<ExecutorExit>,
) -> ClusterResult<Arc<dyn IsolationModule>> {
    match kind {
        "process" => Ok(Arc::new(ProcessIsolation::new(exits))),
        _ => Err(ClusterError::InvalidArgument(format!(
            "unknown isolation backend: {kind}"
        ))),
    }
}
