mod core;
mod event;
mod handler;
mod options;
mod state;

pub use event::SlaveEvent;
pub use options::SlaveOptions;
pub use state::{ExecutorState, LocalTask, SlaveState};

use crate::election::LeaderTracker;
use crate::id::{FrameworkId, SlaveId};
use crate::net::{Endpoint, MessageSender, ServerMonitor};
use crate::resource::Resources;

pub struct SlaveActor {
    options: SlaveOptions,
    server: ServerMonitor,
    sender: Option<MessageSender>,
    state: SlaveState,
    leader: LeaderTracker,
    /// The current master, from the leader watcher.
    master: Option<Endpoint>,
    /// Assigned by the master on first registration and kept across
    /// failovers.
    slave_id: Option<SlaveId>,
    /// The epoch whose master last acknowledged our registration.
    registered_epoch: u64,
    heartbeat_started: bool,
}

/// A point-in-time view of the slave, produced on the message loop.
#[derive(Debug, Clone)]
pub struct SlaveSnapshot {
    pub slave_id: Option<SlaveId>,
    pub endpoint: Option<Endpoint>,
    pub master: Option<Endpoint>,
    pub total: Resources,
    pub used: Resources,
    pub frameworks: Vec<SlaveFrameworkSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SlaveFrameworkSnapshot {
    pub framework_id: FrameworkId,
    pub executor: Option<ExecutorState>,
    pub queued_tasks: usize,
    pub tasks: Vec<LocalTask>,
}
