use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::election::LeaderEvent;
use crate::id::SlaveId;
use crate::master::MasterSnapshot;
use crate::message::MasterMessage;
use crate::net::{Endpoint, Envelope};

pub enum MasterEvent {
    ServerReady {
        /// The local port the master endpoint listens on.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Message(Envelope<MasterMessage>),
    /// A framework or slave transport died.
    PeerExited {
        peer: Endpoint,
    },
    Leader(LeaderEvent),
    /// The post-failover reconciliation window elapsed.
    ReconciliationExpired {
        epoch: u64,
    },
    /// Check whether a slave has been heard from since `deadline`.
    ProbeSlave {
        slave_id: SlaveId,
        deadline: Instant,
    },
    /// A snapshot request from an observer (tests, state endpoints).
    GetState {
        result: oneshot::Sender<MasterSnapshot>,
    },
    Shutdown,
}
