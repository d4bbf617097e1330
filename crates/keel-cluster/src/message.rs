use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{FrameworkId, OfferId, SlaveId, TaskId};
use crate::net::Endpoint;
use crate::resource::Resources;

/// How a slave launches an executor for a framework: the command to run
/// plus opaque initialization data interpreted by the executor itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub uri: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    pub executor: ExecutorInfo,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    /// Terminal states free the task's resources exactly once.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Starting => write!(f, "STARTING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Finished => write!(f, "FINISHED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Killed => write!(f, "KILLED"),
            TaskState::Lost => write!(f, "LOST"),
        }
    }
}

/// A task to launch, as described by the framework against an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub slave_id: SlaveId,
    pub name: String,
    pub resources: Resources,
    pub data: Vec<u8>,
    pub params: BTreeMap<String, String>,
}

/// A task state transition, emitted by the slave hosting the task and
/// relayed to the framework by the master. `slave_id` is [None] only in
/// synthetic updates the master fabricates for tasks it cannot attribute
/// to any slave (e.g. a kill request for an unknown task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub task_id: TaskId,
    pub slave_id: Option<SlaveId>,
    pub state: TaskState,
    pub message: Option<String>,
}

/// One slave's slice of a resource offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveOffer {
    pub slave_id: SlaveId,
    pub hostname: String,
    pub resources: Resources,
}

/// A running task as reported by a slave when it re-registers with a
/// new master after failover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub framework_id: FrameworkId,
    pub task_id: TaskId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

/// Messages accepted by the master's endpoint, from frameworks and slaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterMessage {
    RegisterFramework {
        framework: FrameworkInfo,
    },
    ReregisterFramework {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
    },
    UnregisterFramework {
        framework_id: FrameworkId,
    },
    LaunchTasks {
        framework_id: FrameworkId,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    /// Opaque bytes from a framework to its executor on a slave.
    FrameworkToExecutor {
        framework_id: FrameworkId,
        slave_id: SlaveId,
        data: Vec<u8>,
    },
    RegisterSlave {
        hostname: String,
        resources: Resources,
    },
    ReregisterSlave {
        slave_id: SlaveId,
        hostname: String,
        resources: Resources,
        tasks: Vec<TaskInfo>,
    },
    UnregisterSlave {
        slave_id: SlaveId,
    },
    StatusUpdate(StatusUpdate),
    /// Opaque bytes from an executor back to its framework.
    ExecutorToFramework {
        framework_id: FrameworkId,
        slave_id: SlaveId,
        data: Vec<u8>,
    },
    Heartbeat {
        slave_id: SlaveId,
    },
}

/// Messages accepted by a framework's scheduler driver, from the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerMessage {
    FrameworkRegistered {
        framework_id: FrameworkId,
    },
    ResourceOffer {
        offer_id: OfferId,
        offers: Vec<SlaveOffer>,
    },
    StatusUpdate(StatusUpdate),
    ExecutorToFramework {
        slave_id: SlaveId,
        data: Vec<u8>,
    },
    /// Sent by a standby master: the sender should talk to `leader`.
    LeaderRedirect {
        epoch: u64,
        leader: Option<Endpoint>,
    },
    FrameworkError {
        message: String,
    },
}

/// Messages accepted by a slave's endpoint, from the master and from
/// the executors it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlaveMessage {
    SlaveRegistered {
        slave_id: SlaveId,
    },
    SlaveReregistered {
        slave_id: SlaveId,
    },
    RunTask {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        task: TaskDescription,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    /// The framework is gone; kill its executor and drop its records.
    KillFramework {
        framework_id: FrameworkId,
    },
    FrameworkToExecutor {
        framework_id: FrameworkId,
        data: Vec<u8>,
    },
    LeaderRedirect {
        epoch: u64,
        leader: Option<Endpoint>,
    },
    RegisterExecutor {
        framework_id: FrameworkId,
    },
    ExecutorStatusUpdate {
        framework_id: FrameworkId,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    },
    ExecutorToFramework {
        framework_id: FrameworkId,
        data: Vec<u8>,
    },
}

/// Messages accepted by an executor driver, from its slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutorMessage {
    ExecutorRegistered {
        framework_id: FrameworkId,
        slave_id: SlaveId,
        /// The framework's opaque executor initialization data.
        data: Vec<u8>,
    },
    RunTask {
        task: TaskDescription,
    },
    KillTask {
        task_id: TaskId,
    },
    FrameworkToExecutor {
        data: Vec<u8>,
    },
    Shutdown,
}
