use tokio::sync::oneshot;

use crate::election::LeaderEvent;
use crate::id::{FrameworkId, TaskId};
use crate::message::SlaveMessage;
use crate::net::{Endpoint, Envelope};
use crate::slave::SlaveSnapshot;

pub enum SlaveEvent {
    ServerReady {
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Message(Envelope<SlaveMessage>),
    PeerExited {
        peer: Endpoint,
    },
    Leader(LeaderEvent),
    /// The isolation module launched an executor.
    ExecutorLaunched {
        framework_id: FrameworkId,
        status: String,
    },
    /// The isolation module refused to launch an executor.
    ExecutorLaunchFailed {
        framework_id: FrameworkId,
        message: String,
    },
    /// Reported exactly once per launched executor.
    ExecutorExited {
        framework_id: FrameworkId,
        status: i32,
    },
    /// The executor did not register back in time.
    ExecutorRegistrationTimeout {
        framework_id: FrameworkId,
    },
    /// A forwarded kill was not answered in time.
    KillTaskTimeout {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    /// Re-send the registration if the master has not acknowledged it.
    RegistrationRetry,
    /// The periodic heartbeat tick.
    Heartbeat,
    GetState {
        result: oneshot::Sender<SlaveSnapshot>,
    },
    Shutdown,
}
