use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use crate::allocator::{ClusterView, FrameworkView, SlaveView};
use crate::error::{ClusterError, ClusterResult};
use crate::id::{FrameworkId, IdGenerator, OfferId, SlaveId, TaskId};
use crate::message::{FrameworkInfo, TaskInfo, TaskState};
use crate::net::Endpoint;
use crate::resource::Resources;

/// A task as tracked by the master. The record is dropped once the task
/// reaches a terminal state; the identifier stays retired for the
/// lifetime of the framework.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

#[derive(Debug)]
pub struct FrameworkRecord {
    pub info: FrameworkInfo,
    /// [None] while the framework is known only from slave
    /// re-registrations and has not yet reconnected itself.
    pub endpoint: Option<Endpoint>,
    pub active_offers: HashSet<OfferId>,
    pub tasks: HashMap<TaskId, Task>,
    /// Identifiers of tasks that already reached a terminal state.
    /// They may never be reused while the framework lives.
    pub retired_tasks: HashSet<TaskId>,
}

impl FrameworkRecord {
    pub fn held(&self) -> Resources {
        let mut held = Resources::new();
        for task in self.tasks.values() {
            held.add(&task.resources);
        }
        held
    }

    fn has_tasks_on(&self, slave_id: SlaveId) -> bool {
        self.tasks.values().any(|task| task.slave_id == slave_id)
    }
}

#[derive(Debug)]
pub struct SlaveRecord {
    pub endpoint: Endpoint,
    pub hostname: String,
    pub total: Resources,
    /// Resources held by non-terminal tasks on this slave.
    pub used: Resources,
    /// Resources locked in outstanding offers on this slave.
    pub offered: Resources,
    pub frameworks: HashSet<FrameworkId>,
    pub last_heartbeat: Instant,
}

impl SlaveRecord {
    /// The remainder available for new offers.
    pub fn free(&self) -> Resources {
        let mut claimed = self.used.clone();
        claimed.add(&self.offered);
        self.total.checked_sub(&claimed).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct OfferRecord {
    pub framework_id: FrameworkId,
    pub slices: Vec<(SlaveId, Resources)>,
}

/// The outcome of applying a status update.
#[derive(Debug, PartialEq)]
pub enum TaskTransition {
    /// The transition was applied; forward the update to the framework.
    /// `recovered` carries the freed resources when the state is terminal.
    Updated { recovered: Option<Resources> },
    /// A duplicate terminal update, or a non-terminal update after a
    /// terminal state. Dropped.
    Stale,
    /// No such task.
    Unknown,
    /// The update names a slave other than the one hosting the task.
    WrongSlave,
}

pub struct RemovedFramework {
    pub endpoint: Option<Endpoint>,
    /// Non-terminal tasks at removal time, already detached from slaves.
    pub lost_tasks: Vec<Task>,
    /// Slaves that were hosting this framework.
    pub slaves: Vec<SlaveId>,
}

pub struct RemovedSlave {
    pub endpoint: Endpoint,
    pub lost_tasks: Vec<Task>,
    pub invalidated_offers: Vec<OfferId>,
}

#[derive(Debug)]
pub struct MasterState {
    epoch: u64,
    frameworks: HashMap<FrameworkId, FrameworkRecord>,
    slaves: HashMap<SlaveId, SlaveRecord>,
    offers: HashMap<OfferId, OfferRecord>,
    /// Slave registration order, the iteration order for allocation.
    slave_order: Vec<SlaveId>,
    framework_ids: IdGenerator<FrameworkId>,
    slave_ids: IdGenerator<SlaveId>,
    offer_ids: IdGenerator<OfferId>,
    framework_by_endpoint: HashMap<Endpoint, FrameworkId>,
    slave_by_endpoint: HashMap<Endpoint, SlaveId>,
}

impl MasterState {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            frameworks: HashMap::new(),
            slaves: HashMap::new(),
            offers: HashMap::new(),
            slave_order: vec![],
            framework_ids: IdGenerator::new(epoch),
            slave_ids: IdGenerator::new(epoch),
            offer_ids: IdGenerator::new(epoch),
            framework_by_endpoint: HashMap::new(),
            slave_by_endpoint: HashMap::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn framework(&self, framework_id: FrameworkId) -> Option<&FrameworkRecord> {
        self.frameworks.get(&framework_id)
    }

    pub fn slave(&self, slave_id: SlaveId) -> Option<&SlaveRecord> {
        self.slaves.get(&slave_id)
    }

    pub fn offer(&self, offer_id: OfferId) -> Option<&OfferRecord> {
        self.offers.get(&offer_id)
    }

    pub fn framework_by_endpoint(&self, endpoint: &Endpoint) -> Option<FrameworkId> {
        self.framework_by_endpoint.get(endpoint).copied()
    }

    pub fn slave_by_endpoint(&self, endpoint: &Endpoint) -> Option<SlaveId> {
        self.slave_by_endpoint.get(endpoint).copied()
    }

    pub fn frameworks(&self) -> impl Iterator<Item = (FrameworkId, &FrameworkRecord)> {
        self.frameworks.iter().map(|(&id, record)| (id, record))
    }

    pub fn slaves(&self) -> impl Iterator<Item = (SlaveId, &SlaveRecord)> {
        self.slaves.iter().map(|(&id, record)| (id, record))
    }

    /// Slave identifiers in registration order.
    pub fn slave_order(&self) -> &[SlaveId] {
        &self.slave_order
    }

    pub fn record_slave_heartbeat(&mut self, slave_id: SlaveId) -> Option<Instant> {
        let slave = self.slaves.get_mut(&slave_id)?;
        slave.last_heartbeat = Instant::now();
        Some(slave.last_heartbeat)
    }

    pub fn register_framework(
        &mut self,
        endpoint: Endpoint,
        info: FrameworkInfo,
    ) -> ClusterResult<FrameworkId> {
        let framework_id = self.framework_ids.next()?;
        self.framework_by_endpoint
            .insert(endpoint.clone(), framework_id);
        self.frameworks.insert(
            framework_id,
            FrameworkRecord {
                info,
                endpoint: Some(endpoint),
                active_offers: HashSet::new(),
                tasks: HashMap::new(),
                retired_tasks: HashSet::new(),
            },
        );
        Ok(framework_id)
    }

    /// Reconnect a framework after failover. The framework keeps the
    /// identifier it was minted by a previous master; a record synthesized
    /// from slave re-registrations is completed with the real info.
    pub fn reregister_framework(
        &mut self,
        framework_id: FrameworkId,
        endpoint: Endpoint,
        info: FrameworkInfo,
    ) {
        let record = self
            .frameworks
            .entry(framework_id)
            .or_insert_with(|| FrameworkRecord {
                info: info.clone(),
                endpoint: None,
                active_offers: HashSet::new(),
                tasks: HashMap::new(),
                retired_tasks: HashSet::new(),
            });
        if let Some(previous) = record.endpoint.take() {
            self.framework_by_endpoint.remove(&previous);
        }
        record.info = info;
        record.endpoint = Some(endpoint.clone());
        self.framework_by_endpoint.insert(endpoint, framework_id);
    }

    pub fn remove_framework(&mut self, framework_id: FrameworkId) -> Option<RemovedFramework> {
        let record = self.frameworks.remove(&framework_id)?;
        if let Some(endpoint) = record.endpoint.as_ref() {
            self.framework_by_endpoint.remove(endpoint);
        }
        for offer_id in record.active_offers.iter() {
            if let Some(offer) = self.offers.remove(offer_id) {
                self.unlock_offered(&offer);
            }
        }
        let mut slaves = HashSet::new();
        let mut lost_tasks = vec![];
        for (_, mut task) in record.tasks {
            if let Some(slave) = self.slaves.get_mut(&task.slave_id) {
                slave.used = slave
                    .used
                    .checked_sub(&task.resources)
                    .unwrap_or_else(|| slave.used.clone());
                slave.frameworks.remove(&framework_id);
                slaves.insert(task.slave_id);
            }
            task.state = TaskState::Lost;
            lost_tasks.push(task);
        }
        Some(RemovedFramework {
            endpoint: record.endpoint,
            lost_tasks,
            slaves: slaves.into_iter().collect(),
        })
    }

    pub fn register_slave(
        &mut self,
        endpoint: Endpoint,
        hostname: String,
        resources: Resources,
    ) -> ClusterResult<SlaveId> {
        let slave_id = self.slave_ids.next()?;
        self.slave_by_endpoint.insert(endpoint.clone(), slave_id);
        self.slaves.insert(
            slave_id,
            SlaveRecord {
                endpoint,
                hostname,
                total: resources,
                used: Resources::new(),
                offered: Resources::new(),
                frameworks: HashSet::new(),
                last_heartbeat: Instant::now(),
            },
        );
        self.slave_order.push(slave_id);
        Ok(slave_id)
    }

    /// Accept a slave that re-registers after master failover, trusting
    /// its task list. Frameworks named by tasks but unknown here are
    /// synthesized as pending reconnect; the returned list names them.
    pub fn reregister_slave(
        &mut self,
        slave_id: SlaveId,
        endpoint: Endpoint,
        hostname: String,
        resources: Resources,
        tasks: Vec<TaskInfo>,
    ) -> ClusterResult<Vec<FrameworkId>> {
        if self.slaves.contains_key(&slave_id) {
            return Err(ClusterError::InvalidArgument(format!(
                "slave {slave_id} is already registered"
            )));
        }
        // Reject the whole re-registration before touching any state if the
        // slave claims a task that is already accounted to another slave.
        for task in tasks.iter() {
            if let Some(framework) = self.frameworks.get(&task.framework_id) {
                if framework.tasks.contains_key(&task.task_id)
                    || framework.retired_tasks.contains(&task.task_id)
                {
                    return Err(ClusterError::InvalidArgument(format!(
                        "task {} of framework {} is already accounted elsewhere",
                        task.task_id, task.framework_id
                    )));
                }
            }
        }
        self.slave_by_endpoint.insert(endpoint.clone(), slave_id);
        self.slaves.insert(
            slave_id,
            SlaveRecord {
                endpoint,
                hostname,
                total: resources,
                used: Resources::new(),
                offered: Resources::new(),
                frameworks: HashSet::new(),
                last_heartbeat: Instant::now(),
            },
        );
        self.slave_order.push(slave_id);

        let mut synthesized = vec![];
        for task in tasks {
            if task.state.is_terminal() {
                continue;
            }
            if !self.frameworks.contains_key(&task.framework_id) {
                self.frameworks.insert(
                    task.framework_id,
                    FrameworkRecord {
                        info: FrameworkInfo {
                            name: String::new(),
                            user: String::new(),
                            executor: crate::message::ExecutorInfo {
                                uri: String::new(),
                                data: vec![],
                            },
                        },
                        endpoint: None,
                        active_offers: HashSet::new(),
                        tasks: HashMap::new(),
                        retired_tasks: HashSet::new(),
                    },
                );
                synthesized.push(task.framework_id);
            }
            self.add_task(Task {
                task_id: task.task_id,
                framework_id: task.framework_id,
                slave_id,
                name: task.name,
                resources: task.resources,
                state: task.state,
            })?;
        }
        Ok(synthesized)
    }

    pub fn remove_slave(&mut self, slave_id: SlaveId) -> Option<RemovedSlave> {
        let slave = self.slaves.remove(&slave_id)?;
        self.slave_by_endpoint.remove(&slave.endpoint);
        self.slave_order.retain(|&id| id != slave_id);

        // Any offer touching the slave dies with it; slices on surviving
        // slaves unlock and become free for the next allocation.
        let invalidated = self
            .offers
            .iter()
            .filter(|(_, offer)| offer.slices.iter().any(|(id, _)| *id == slave_id))
            .map(|(&offer_id, _)| offer_id)
            .collect::<Vec<_>>();
        for offer_id in invalidated.iter() {
            if let Some(offer) = self.offers.remove(offer_id) {
                self.unlock_offered(&offer);
                if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
                    framework.active_offers.remove(offer_id);
                }
            }
        }

        let mut lost_tasks = vec![];
        for framework_id in slave.frameworks.iter() {
            let Some(framework) = self.frameworks.get_mut(framework_id) else {
                continue;
            };
            let task_ids = framework
                .tasks
                .values()
                .filter(|task| task.slave_id == slave_id)
                .map(|task| task.task_id)
                .collect::<Vec<_>>();
            for task_id in task_ids {
                if let Some(mut task) = framework.tasks.remove(&task_id) {
                    framework.retired_tasks.insert(task_id);
                    task.state = TaskState::Lost;
                    lost_tasks.push(task);
                }
            }
        }
        Some(RemovedSlave {
            endpoint: slave.endpoint,
            lost_tasks,
            invalidated_offers: invalidated,
        })
    }

    /// Turn an allocator bundle into an offer, locking the offered
    /// resources. Fails when the bundle violates the allocator contract.
    pub fn add_offer(
        &mut self,
        framework_id: FrameworkId,
        slices: Vec<(SlaveId, Resources)>,
    ) -> ClusterResult<OfferId> {
        let framework = self.frameworks.get(&framework_id).ok_or_else(|| {
            ClusterError::InvalidArgument(format!("unknown framework {framework_id}"))
        })?;
        if framework.endpoint.is_none() {
            return Err(ClusterError::InvalidArgument(format!(
                "framework {framework_id} is not connected"
            )));
        }
        for (slave_id, resources) in slices.iter() {
            let slave = self.slaves.get(slave_id).ok_or_else(|| {
                ClusterError::InvalidArgument(format!("unknown slave {slave_id}"))
            })?;
            if !slave.free().contains(resources) {
                return Err(ClusterError::InvalidArgument(format!(
                    "offer of {resources} exceeds free resources on slave {slave_id}"
                )));
            }
        }
        let offer_id = self.offer_ids.next()?;
        for (slave_id, resources) in slices.iter() {
            if let Some(slave) = self.slaves.get_mut(slave_id) {
                slave.offered.add(resources);
            }
        }
        self.offers.insert(
            offer_id,
            OfferRecord {
                framework_id,
                slices,
            },
        );
        if let Some(framework) = self.frameworks.get_mut(&framework_id) {
            framework.active_offers.insert(offer_id);
        }
        Ok(offer_id)
    }

    /// Consume or decline an offer, unlocking its resources.
    /// An offer can be removed at most once; later references fail.
    pub fn remove_offer(&mut self, offer_id: OfferId) -> Option<OfferRecord> {
        let offer = self.offers.remove(&offer_id)?;
        self.unlock_offered(&offer);
        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.active_offers.remove(&offer_id);
        }
        Some(offer)
    }

    fn unlock_offered(&mut self, offer: &OfferRecord) {
        for (slave_id, resources) in offer.slices.iter() {
            if let Some(slave) = self.slaves.get_mut(slave_id) {
                slave.offered = slave
                    .offered
                    .checked_sub(resources)
                    .unwrap_or_else(|| slave.offered.clone());
            }
        }
    }

    pub fn add_task(&mut self, task: Task) -> ClusterResult<()> {
        let framework = self.frameworks.get_mut(&task.framework_id).ok_or_else(|| {
            ClusterError::InvalidArgument(format!("unknown framework {}", task.framework_id))
        })?;
        if framework.tasks.contains_key(&task.task_id)
            || framework.retired_tasks.contains(&task.task_id)
        {
            return Err(ClusterError::InvalidArgument(format!(
                "task {} already exists in framework {}",
                task.task_id, task.framework_id
            )));
        }
        let slave = self.slaves.get_mut(&task.slave_id).ok_or_else(|| {
            ClusterError::InvalidArgument(format!("unknown slave {}", task.slave_id))
        })?;
        slave.used.add(&task.resources);
        slave.frameworks.insert(task.framework_id);
        framework.tasks.insert(task.task_id, task);
        Ok(())
    }

    /// Apply a status update reported by `from_slave`.
    pub fn update_task(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        from_slave: SlaveId,
        state: TaskState,
    ) -> TaskTransition {
        let Some(framework) = self.frameworks.get_mut(&framework_id) else {
            return TaskTransition::Unknown;
        };
        let Some(task) = framework.tasks.get_mut(&task_id) else {
            if framework.retired_tasks.contains(&task_id) {
                // The task already reached a terminal state.
                return TaskTransition::Stale;
            }
            return TaskTransition::Unknown;
        };
        if task.slave_id != from_slave {
            return TaskTransition::WrongSlave;
        }
        if !state.is_terminal() {
            task.state = state;
            return TaskTransition::Updated { recovered: None };
        }
        let Some(task) = framework.tasks.remove(&task_id) else {
            return TaskTransition::Unknown;
        };
        framework.retired_tasks.insert(task_id);
        let still_hosted = framework.has_tasks_on(task.slave_id);
        if let Some(slave) = self.slaves.get_mut(&task.slave_id) {
            slave.used = slave
                .used
                .checked_sub(&task.resources)
                .unwrap_or_else(|| slave.used.clone());
            if !still_hosted {
                slave.frameworks.remove(&framework_id);
            }
        }
        TaskTransition::Updated {
            recovered: Some(task.resources),
        }
    }

    /// The read-only snapshot handed to the allocator. Only connected
    /// frameworks are offerable; slaves appear in registration order.
    pub fn view(&self) -> ClusterView {
        let mut frameworks = self
            .frameworks
            .iter()
            .filter(|(_, record)| record.endpoint.is_some())
            .map(|(&id, record)| FrameworkView {
                id,
                held: record.held(),
            })
            .collect::<Vec<_>>();
        frameworks.sort_by_key(|framework| framework.id);
        let slaves = self
            .slave_order
            .iter()
            .filter_map(|&id| {
                self.slaves.get(&id).map(|slave| SlaveView {
                    id,
                    free: slave.free(),
                })
            })
            .collect();
        ClusterView { frameworks, slaves }
    }

    /// Componentwise `used + offered <= total` for every slave.
    pub fn check_resource_conservation(&self) -> bool {
        self.slaves.values().all(|slave| {
            let mut claimed = slave.used.clone();
            claimed.add(&slave.offered);
            slave.total.contains(&claimed)
        })
    }
}
