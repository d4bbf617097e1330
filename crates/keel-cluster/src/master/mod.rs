mod core;
mod event;
mod handler;
mod options;
mod state;

pub use event::MasterEvent;
pub use options::MasterOptions;
pub use state::{MasterState, Task, TaskTransition};

use crate::allocator::Allocator;
use crate::election::LeaderTracker;
use crate::id::{FrameworkId, OfferId, SlaveId};
use crate::net::{Endpoint, MessageSender, ServerMonitor};
use crate::resource::Resources;

pub struct MasterActor {
    options: MasterOptions,
    server: ServerMonitor,
    /// Set once the endpoint is bound; no traffic exists before that.
    sender: Option<MessageSender>,
    allocator: Box<dyn Allocator>,
    state: MasterState,
    leader: LeaderTracker,
    /// Whether leadership came from a real election service. A static
    /// single-master deployment has nothing to reconcile on start.
    fault_tolerant: bool,
    leading: bool,
    reconciling: bool,
}

/// A point-in-time view of the master, produced on the message loop.
#[derive(Debug, Clone)]
pub struct MasterSnapshot {
    pub epoch: u64,
    pub leading: bool,
    pub reconciling: bool,
    pub endpoint: Option<Endpoint>,
    pub frameworks: Vec<FrameworkSnapshot>,
    pub slaves: Vec<SlaveSnapshot>,
    pub offers: Vec<OfferSnapshot>,
}

#[derive(Debug, Clone)]
pub struct FrameworkSnapshot {
    pub framework_id: FrameworkId,
    pub name: String,
    pub connected: bool,
    pub tasks: Vec<Task>,
    pub active_offers: Vec<OfferId>,
}

#[derive(Debug, Clone)]
pub struct SlaveSnapshot {
    pub slave_id: SlaveId,
    pub hostname: String,
    pub total: Resources,
    pub used: Resources,
    pub offered: Resources,
}

#[derive(Debug, Clone)]
pub struct OfferSnapshot {
    pub offer_id: OfferId,
    pub framework_id: FrameworkId,
    pub slices: Vec<(SlaveId, Resources)>,
}

impl MasterSnapshot {
    /// Componentwise `used + offered <= total` for every slave.
    pub fn check_resource_conservation(&self) -> bool {
        self.slaves.iter().all(|slave| {
            let mut claimed = slave.used.clone();
            claimed.add(&slave.offered);
            slave.total.contains(&claimed)
        })
    }
}
