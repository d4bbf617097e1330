use std::collections::HashMap;
use std::mem;

use keel_server::actor::{ActorAction, ActorContext};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::allocator::{Allocator, ClusterView, OfferBundle};
use crate::election::LeaderEvent;
use crate::error::ClusterResult;
use crate::id::{FrameworkId, OfferId, SlaveId, TaskId};
use crate::master::state::{MasterState, Task, TaskTransition};
use crate::master::{
    FrameworkSnapshot, MasterActor, MasterEvent, MasterSnapshot, OfferSnapshot, SlaveSnapshot,
};
use crate::message::{
    FrameworkInfo, MasterMessage, SchedulerMessage, SlaveMessage, StatusUpdate, TaskDescription,
    TaskInfo, TaskState,
};
use crate::net::{Endpoint, Envelope, MessageSender};
use crate::resource::Resources;

impl MasterActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(x) => x,
            Err(e) => {
                error!("{e}");
                return ActorAction::Stop;
            }
        };
        info!("master endpoint is ready on port {port}");
        let endpoint = Endpoint::new("master", self.options.external_host.clone(), port);
        self.sender = Some(MessageSender::new(endpoint.clone(), self.options.retry.clone()));
        let backend = match self.options.election.take() {
            Some(backend) => {
                self.fault_tolerant = true;
                backend
            }
            None => crate::election::ElectionBackend::Static { leader: endpoint },
        };
        let _ = crate::election::watch(backend, ctx.handle().clone(), MasterEvent::Leader);
        ActorAction::Continue
    }

    pub(super) fn handle_leader(
        &mut self,
        ctx: &mut ActorContext<Self>,
        event: LeaderEvent,
    ) -> ActorAction {
        if !self.leader.observe(&event) {
            return ActorAction::Continue;
        }
        let endpoint = self.sender.as_ref().map(|sender| sender.local().clone());
        let leading = endpoint.is_some() && self.leader.leader() == endpoint.as_ref();
        let epoch = self.leader.epoch();
        if leading {
            info!("elected as leading master for epoch {epoch}");
            self.state = MasterState::new(epoch);
            self.leading = true;
            if self.fault_tolerant {
                // Emit no offers until slaves and frameworks had a chance
                // to re-register with this master.
                self.reconciling = true;
                ctx.send_with_delay(
                    MasterEvent::ReconciliationExpired { epoch },
                    self.options.reconciliation_window,
                );
            }
        } else {
            if self.leading {
                warn!("lost leadership at epoch {epoch}, entering standby");
            } else {
                info!("standing by at epoch {epoch}");
            }
            self.state = MasterState::new(epoch);
            self.leading = false;
            self.reconciling = false;
        }
        ActorAction::Continue
    }

    pub(super) fn handle_reconciliation_expired(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        epoch: u64,
    ) -> ActorAction {
        if !self.leading || !self.reconciling || self.state.epoch() != epoch {
            return ActorAction::Continue;
        }
        self.reconciling = false;
        info!("reconciliation window for epoch {epoch} closed");

        // Frameworks known only from slave task lists that never
        // reconnected are gone for good; release what they held.
        let pending = self
            .state
            .frameworks()
            .filter(|(_, record)| record.endpoint.is_none())
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for framework_id in pending {
            warn!("framework {framework_id} did not reconnect within the reconciliation window");
            self.remove_framework_and_cleanup(framework_id);
        }

        // Resume offering with a full pass over all registered slaves.
        for slave_id in self.state.slave_order().to_vec() {
            self.allocate(|allocator, view| allocator.slave_added(view, slave_id));
        }
        ActorAction::Continue
    }

    pub(super) fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        envelope: Envelope<MasterMessage>,
    ) -> ActorAction {
        let Envelope {
            from,
            epoch,
            message,
        } = envelope;
        if !self.leading {
            self.redirect(&from, &message);
            return ActorAction::Continue;
        }
        if self.leader.is_stale(epoch) {
            // The sender will learn the new leader from the election
            // service; nothing to do here.
            debug!("dropping message with stale epoch {epoch} from {from}");
            return ActorAction::Continue;
        }
        match message {
            MasterMessage::RegisterFramework { framework } => {
                self.handle_register_framework(ctx, from, framework)
            }
            MasterMessage::ReregisterFramework {
                framework_id,
                framework,
            } => self.handle_reregister_framework(ctx, from, framework_id, framework),
            MasterMessage::UnregisterFramework { framework_id } => {
                self.handle_unregister_framework(ctx, from, framework_id)
            }
            MasterMessage::LaunchTasks {
                framework_id,
                offer_id,
                tasks,
            } => self.handle_launch_tasks(ctx, from, framework_id, offer_id, tasks),
            MasterMessage::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(ctx, from, framework_id, task_id),
            MasterMessage::FrameworkToExecutor {
                framework_id,
                slave_id,
                data,
            } => self.handle_framework_to_executor(ctx, from, framework_id, slave_id, data),
            MasterMessage::RegisterSlave {
                hostname,
                resources,
            } => self.handle_register_slave(ctx, from, hostname, resources),
            MasterMessage::ReregisterSlave {
                slave_id,
                hostname,
                resources,
                tasks,
            } => self.handle_reregister_slave(ctx, from, slave_id, hostname, resources, tasks),
            MasterMessage::UnregisterSlave { slave_id } => {
                self.handle_unregister_slave(ctx, from, slave_id)
            }
            MasterMessage::StatusUpdate(update) => self.handle_status_update(ctx, from, update),
            MasterMessage::ExecutorToFramework {
                framework_id,
                slave_id,
                data,
            } => self.handle_executor_to_framework(ctx, from, framework_id, slave_id, data),
            MasterMessage::Heartbeat { slave_id } => self.handle_heartbeat(ctx, from, slave_id),
        }
    }

    fn handle_register_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework: FrameworkInfo,
    ) -> ActorAction {
        // Registration must be idempotent: the framework retries until
        // it sees the acknowledgment.
        if let Some(framework_id) = self.state.framework_by_endpoint(&from) {
            self.post(from, SchedulerMessage::FrameworkRegistered { framework_id });
            return ActorAction::Continue;
        }
        let framework_id = match self.state.register_framework(from.clone(), framework) {
            Ok(x) => x,
            Err(e) => {
                error!("failed to register framework from {from}: {e}");
                return ActorAction::Continue;
            }
        };
        info!("registered framework {framework_id} at {from}");
        self.post(from, SchedulerMessage::FrameworkRegistered { framework_id });
        self.allocate(|allocator, view| {
            allocator.framework_added(view, framework_id)
        });
        ActorAction::Continue
    }

    fn handle_reregister_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
    ) -> ActorAction {
        info!("framework {framework_id} reconnected from {from}");
        self.state
            .reregister_framework(framework_id, from.clone(), framework);
        self.post(from, SchedulerMessage::FrameworkRegistered { framework_id });
        self.allocate(|allocator, view| {
            allocator.framework_added(view, framework_id)
        });
        ActorAction::Continue
    }

    fn handle_unregister_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
    ) -> ActorAction {
        if self.state.framework_by_endpoint(&from) != Some(framework_id) {
            warn!("ignoring unregistration of framework {framework_id} from {from}");
            return ActorAction::Continue;
        }
        info!("unregistering framework {framework_id}");
        self.remove_framework_and_cleanup(framework_id);
        ActorAction::Continue
    }

    fn handle_register_slave(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Endpoint,
        hostname: String,
        resources: Resources,
    ) -> ActorAction {
        if let Some(slave_id) = self.state.slave_by_endpoint(&from) {
            self.post(from, SlaveMessage::SlaveRegistered { slave_id });
            return ActorAction::Continue;
        }
        let slave_id = match self
            .state
            .register_slave(from.clone(), hostname, resources)
        {
            Ok(x) => x,
            Err(e) => {
                error!("failed to register slave from {from}: {e}");
                return ActorAction::Continue;
            }
        };
        info!("registered slave {slave_id} at {from}");
        self.post(from, SlaveMessage::SlaveRegistered { slave_id });
        self.arm_slave_probe(ctx, slave_id);
        self.allocate(|allocator, view| allocator.slave_added(view, slave_id));
        ActorAction::Continue
    }

    fn handle_reregister_slave(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Endpoint,
        slave_id: SlaveId,
        hostname: String,
        resources: Resources,
        tasks: Vec<TaskInfo>,
    ) -> ActorAction {
        if self.state.slave(slave_id).is_some() {
            self.post(from, SlaveMessage::SlaveReregistered { slave_id });
            return ActorAction::Continue;
        }
        match self
            .state
            .reregister_slave(slave_id, from.clone(), hostname, resources, tasks)
        {
            Ok(synthesized) => {
                info!("slave {slave_id} re-registered from {from}");
                for framework_id in synthesized {
                    info!("framework {framework_id} is pending reconnect");
                }
            }
            Err(e) => {
                // The slave claims state that contradicts the cluster;
                // treat it as a protocol violation and do not admit it.
                warn!("rejecting re-registration of slave {slave_id}: {e}");
                return ActorAction::Continue;
            }
        }
        self.post(from, SlaveMessage::SlaveReregistered { slave_id });
        self.arm_slave_probe(ctx, slave_id);
        self.allocate(|allocator, view| allocator.slave_added(view, slave_id));
        ActorAction::Continue
    }

    fn handle_unregister_slave(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        slave_id: SlaveId,
    ) -> ActorAction {
        if self.state.slave_by_endpoint(&from) != Some(slave_id) {
            warn!("ignoring unregistration of slave {slave_id} from {from}");
            return ActorAction::Continue;
        }
        info!("slave {slave_id} unregistered");
        self.remove_slave_and_cleanup(slave_id);
        ActorAction::Continue
    }

    fn handle_launch_tasks(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
    ) -> ActorAction {
        let Some(sender_id) = self.state.framework_by_endpoint(&from) else {
            warn!("ignoring task launch from unknown endpoint {from}");
            return ActorAction::Continue;
        };
        if sender_id != framework_id {
            self.protocol_violation(framework_id,
                &format!("endpoint {from} does not own framework {framework_id}"),
            );
            return ActorAction::Continue;
        }
        let Some(offer) = self.state.offer(offer_id).cloned() else {
            // The offer is unknown or already settled: a benign race with
            // failover or slave loss. The tasks were never started.
            debug!("task launch from framework {framework_id} references dead offer {offer_id}");
            for task in tasks {
                self.post_status(framework_id,
                    task.task_id,
                    None,
                    TaskState::Lost,
                    Some("invalid offer".to_string()),
                );
            }
            return ActorAction::Continue;
        };
        if offer.framework_id != framework_id {
            self.protocol_violation(framework_id,
                &format!("offer {offer_id} belongs to another framework"),
            );
            return ActorAction::Continue;
        }

        // Consumption settles the offer exactly once.
        self.state.remove_offer(offer_id);

        // Tasks are accepted one at a time. The first violating task
        // severs the framework; tasks accepted before it are taken down
        // with the framework, as on any framework loss.
        let mut spent: HashMap<SlaveId, Resources> = HashMap::new();
        for task in tasks {
            if let Err(violation) = self.validate_task(framework_id, &offer.slices, &spent, &task) {
                self.protocol_violation(framework_id, &violation);
                return ActorAction::Continue;
            }
            spent
                .entry(task.slave_id)
                .or_default()
                .add(&task.resources);
            if let Err(e) = self.state.add_task(Task {
                task_id: task.task_id,
                framework_id,
                slave_id: task.slave_id,
                name: task.name.clone(),
                resources: task.resources.clone(),
                state: TaskState::Starting,
            }) {
                // A validated task that cannot be recorded means the
                // bookkeeping no longer agrees with itself.
                error!("invariant violated while recording task {}: {e}", task.task_id);
                return ActorAction::Stop;
            }
            let Some(framework) = self.state.framework(framework_id) else {
                break;
            };
            let info = framework.info.clone();
            let Some(slave) = self.state.slave(task.slave_id) else {
                continue;
            };
            debug!(
                "forwarding task {} of framework {framework_id} to slave {}",
                task.task_id, task.slave_id
            );
            self.post(slave.endpoint.clone(),
                SlaveMessage::RunTask {
                    framework_id,
                    framework: info,
                    task,
                },
            );
        }

        // Whatever the framework did not spend goes back to the allocator.
        for (slave_id, offered) in offer.slices {
            let leftover = match spent.get(&slave_id) {
                Some(used) => offered.checked_sub(used).unwrap_or_default(),
                None => offered,
            };
            if !leftover.is_empty() {
                self.allocate(|allocator, view| {
                    allocator.resources_unused(view, framework_id, slave_id, &leftover)
                });
            }
        }
        ActorAction::Continue
    }

    /// Check one task of a launch request against the offer it came from
    /// and what the launch has already spent. Returns the violation
    /// description for the protocol-error path.
    fn validate_task(
        &self,
        framework_id: FrameworkId,
        slices: &[(SlaveId, Resources)],
        spent: &HashMap<SlaveId, Resources>,
        task: &TaskDescription,
    ) -> Result<(), String> {
        let Some(framework) = self.state.framework(framework_id) else {
            return Err(format!("unknown framework {framework_id}"));
        };
        if framework.tasks.contains_key(&task.task_id)
            || framework.retired_tasks.contains(&task.task_id)
        {
            return Err(format!("task {} already exists", task.task_id));
        }
        let Some((_, offered)) = slices
            .iter()
            .find(|(slave_id, _)| *slave_id == task.slave_id)
        else {
            return Err(format!(
                "task {} names slave {} outside the offer",
                task.task_id, task.slave_id
            ));
        };
        let mut wanted = spent.get(&task.slave_id).cloned().unwrap_or_default();
        wanted.add(&task.resources);
        if !offered.contains(&wanted) {
            return Err(format!(
                "launch requests {wanted} but the offer holds {offered} on slave {}",
                task.slave_id
            ));
        }
        Ok(())
    }

    fn handle_kill_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        if self.state.framework_by_endpoint(&from) != Some(framework_id) {
            warn!("ignoring kill of task {task_id} from {from}");
            return ActorAction::Continue;
        }
        let task = self
            .state
            .framework(framework_id)
            .and_then(|framework| framework.tasks.get(&task_id))
            .cloned();
        match task {
            Some(task) => {
                if let Some(slave) = self.state.slave(task.slave_id) {
                    self.post(slave.endpoint.clone(),
                        SlaveMessage::KillTask {
                            framework_id,
                            task_id,
                        },
                    );
                }
            }
            None => {
                warn!("framework {framework_id} tried to kill unknown task {task_id}");
                self.post_status(framework_id,
                    task_id,
                    None,
                    TaskState::Lost,
                    Some("attempted to kill an unknown task".to_string()),
                );
            }
        }
        ActorAction::Continue
    }

    fn handle_status_update(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        update: StatusUpdate,
    ) -> ActorAction {
        let Some(sender_id) = self.state.slave_by_endpoint(&from) else {
            warn!("ignoring status update from unknown endpoint {from}");
            return ActorAction::Continue;
        };
        if update.slave_id != Some(sender_id) {
            warn!(
                "slave {sender_id} sent a status update naming slave {:?}",
                update.slave_id
            );
            self.remove_slave_and_cleanup(sender_id);
            return ActorAction::Continue;
        }
        let transition =
            self.state
                .update_task(update.framework_id, update.task_id, sender_id, update.state);
        match transition {
            TaskTransition::Updated { recovered } => {
                debug!(
                    "task {} of framework {} is now {}",
                    update.task_id, update.framework_id, update.state
                );
                let framework_id = update.framework_id;
                self.post_to_framework(framework_id, SchedulerMessage::StatusUpdate(update));
                if let Some(recovered) = recovered {
                    self.allocate(|allocator, view| {
                        allocator.resources_recovered(view, framework_id, sender_id, &recovered)
                    });
                }
            }
            TaskTransition::Stale => {
                debug!(
                    "dropping stale update for task {} of framework {}",
                    update.task_id, update.framework_id
                );
            }
            TaskTransition::Unknown => {
                warn!(
                    "dropping update for unknown task {} of framework {}",
                    update.task_id, update.framework_id
                );
            }
            TaskTransition::WrongSlave => {
                warn!(
                    "slave {sender_id} reported on task {} it does not host",
                    update.task_id
                );
                self.remove_slave_and_cleanup(sender_id);
            }
        }
        ActorAction::Continue
    }

    fn handle_framework_to_executor(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        slave_id: SlaveId,
        data: Vec<u8>,
    ) -> ActorAction {
        if self.state.framework_by_endpoint(&from) != Some(framework_id) {
            warn!("ignoring framework message from {from}");
            return ActorAction::Continue;
        }
        if let Some(slave) = self.state.slave(slave_id) {
            self.post(slave.endpoint.clone(),
                SlaveMessage::FrameworkToExecutor { framework_id, data },
            );
        }
        ActorAction::Continue
    }

    fn handle_executor_to_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        slave_id: SlaveId,
        data: Vec<u8>,
    ) -> ActorAction {
        if self.state.slave_by_endpoint(&from) != Some(slave_id) {
            warn!("ignoring executor message from {from}");
            return ActorAction::Continue;
        }
        self.post_to_framework(framework_id,
            SchedulerMessage::ExecutorToFramework { slave_id, data },
        );
        ActorAction::Continue
    }

    fn handle_heartbeat(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Endpoint,
        slave_id: SlaveId,
    ) -> ActorAction {
        if self.state.slave_by_endpoint(&from) != Some(slave_id) {
            debug!("ignoring heartbeat from {from}");
            return ActorAction::Continue;
        }
        if self.state.record_slave_heartbeat(slave_id).is_some() {
            self.arm_slave_probe(ctx, slave_id);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_probe_slave(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        deadline: Instant,
    ) -> ActorAction {
        let silent = self
            .state
            .slave(slave_id)
            .is_some_and(|slave| slave.last_heartbeat <= deadline);
        if silent {
            warn!("slave {slave_id} missed its heartbeat deadline");
            self.remove_slave_and_cleanup(slave_id);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_peer_exited(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        peer: Endpoint,
    ) -> ActorAction {
        if let Some(framework_id) = self.state.framework_by_endpoint(&peer) {
            warn!("lost connection to framework {framework_id} at {peer}");
            self.remove_framework_and_cleanup(framework_id);
        } else if let Some(slave_id) = self.state.slave_by_endpoint(&peer) {
            warn!("lost connection to slave {slave_id} at {peer}");
            self.remove_slave_and_cleanup(slave_id);
        } else {
            debug!("peer {peer} went away");
        }
        ActorAction::Continue
    }

    pub(super) fn handle_get_state(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<MasterSnapshot>,
    ) -> ActorAction {
        let frameworks = self
            .state
            .frameworks()
            .map(|(framework_id, record)| FrameworkSnapshot {
                framework_id,
                name: record.info.name.clone(),
                connected: record.endpoint.is_some(),
                tasks: record.tasks.values().cloned().collect(),
                active_offers: record.active_offers.iter().copied().collect(),
            })
            .collect();
        let slaves = self
            .state
            .slave_order()
            .iter()
            .filter_map(|&slave_id| {
                self.state.slave(slave_id).map(|slave| SlaveSnapshot {
                    slave_id,
                    hostname: slave.hostname.clone(),
                    total: slave.total.clone(),
                    used: slave.used.clone(),
                    offered: slave.offered.clone(),
                })
            })
            .collect();
        let mut offers = vec![];
        for (framework_id, record) in self.state.frameworks() {
            for &offer_id in record.active_offers.iter() {
                if let Some(offer) = self.state.offer(offer_id) {
                    offers.push(OfferSnapshot {
                        offer_id,
                        framework_id,
                        slices: offer.slices.clone(),
                    });
                }
            }
        }
        let _ = result.send(MasterSnapshot {
            epoch: self.state.epoch(),
            leading: self.leading,
            reconciling: self.reconciling,
            endpoint: self.sender.as_ref().map(|sender| sender.local().clone()),
            frameworks,
            slaves,
            offers,
        });
        ActorAction::Continue
    }

    /// Disconnect a misbehaving framework and clean up as if its
    /// transport had failed. One log line per violation.
    fn protocol_violation(&mut self, framework_id: FrameworkId, violation: &str) {
        warn!("protocol violation by framework {framework_id}: {violation}");
        self.post_to_framework(framework_id,
            SchedulerMessage::FrameworkError {
                message: violation.to_string(),
            },
        );
        self.remove_framework_and_cleanup(framework_id);
    }

    fn remove_framework_and_cleanup(&mut self, framework_id: FrameworkId) {
        let Some(removed) = self.state.remove_framework(framework_id) else {
            return;
        };
        for slave_id in removed.slaves {
            if let Some(slave) = self.state.slave(slave_id) {
                self.post(slave.endpoint.clone(),
                    SlaveMessage::KillFramework { framework_id },
                );
            }
        }
        if let Some(endpoint) = removed.endpoint {
            self.forget_peer(&endpoint);
        }
        self.allocate(|allocator, view| {
            allocator.framework_removed(view, framework_id)
        });
    }

    fn remove_slave_and_cleanup(&mut self, slave_id: SlaveId) {
        let Some(removed) = self.state.remove_slave(slave_id) else {
            return;
        };
        for task in removed.lost_tasks {
            self.post_status(task.framework_id,
                task.task_id,
                Some(slave_id),
                TaskState::Lost,
                Some("slave lost".to_string()),
            );
        }
        self.forget_peer(&removed.endpoint);
        self.allocate(|allocator, view| {
            allocator.slave_removed(view, slave_id)
        });
    }

    /// Run one allocator callback and turn the bundles into offers.
    /// Allocator failures skip the cycle; the resources stay free and are
    /// re-offered on the next trigger.
    fn allocate<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn Allocator, &ClusterView) -> ClusterResult<Vec<OfferBundle>>,
    {
        if !self.leading || self.reconciling {
            return;
        }
        let view = self.state.view();
        let bundles = match f(self.allocator.as_mut(), &view) {
            Ok(x) => x,
            Err(e) => {
                warn!("allocator failed, skipping this offer cycle: {e}");
                return;
            }
        };
        for bundle in bundles {
            self.issue_offer(bundle);
        }
    }

    fn issue_offer(&mut self, bundle: OfferBundle) {
        let offers = bundle
            .slices
            .iter()
            .map(|(slave_id, resources)| crate::message::SlaveOffer {
                slave_id: *slave_id,
                hostname: self
                    .state
                    .slave(*slave_id)
                    .map(|slave| slave.hostname.clone())
                    .unwrap_or_default(),
                resources: resources.clone(),
            })
            .collect::<Vec<_>>();
        let offer_id = match self.state.add_offer(bundle.framework_id, bundle.slices) {
            Ok(x) => x,
            Err(e) => {
                warn!("allocator proposed an invalid bundle: {e}");
                return;
            }
        };
        debug!(
            "offering resources to framework {} under offer {offer_id}",
            bundle.framework_id
        );
        self.post_to_framework(bundle.framework_id,
            SchedulerMessage::ResourceOffer { offer_id, offers },
        );
    }

    fn arm_slave_probe(&mut self, ctx: &mut ActorContext<Self>, slave_id: SlaveId) {
        let Some(deadline) = self.state.slave(slave_id).map(|slave| slave.last_heartbeat) else {
            return;
        };
        ctx.send_with_delay(
            MasterEvent::ProbeSlave { slave_id, deadline },
            self.options.slave_heartbeat_timeout,
        );
    }

    fn post_status(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        slave_id: Option<SlaveId>,
        state: TaskState,
        message: Option<String>,
    ) {
        self.post_to_framework(framework_id,
            SchedulerMessage::StatusUpdate(StatusUpdate {
                framework_id,
                task_id,
                slave_id,
                state,
                message,
            }),
        );
    }

    fn post_to_framework(&mut self, framework_id: FrameworkId, message: SchedulerMessage) {
        let endpoint = self
            .state
            .framework(framework_id)
            .and_then(|framework| framework.endpoint.clone());
        if let Some(endpoint) = endpoint {
            self.post(endpoint, message);
        }
    }

    /// Send a message best-effort; delivery failures surface through the
    /// peer's own liveness machinery, not here.
    fn post<M>(&mut self, to: Endpoint, message: M)
    where
        M: Serialize + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if let Err(e) = sender.post(&to, self.state.epoch(), message) {
            debug!("failed to send to {to}: {e}");
        }
    }

    fn forget_peer(&mut self, peer: &Endpoint) {
        if let Some(sender) = self.sender.as_ref() {
            sender.forget(peer);
        }
    }

    fn redirect(&mut self, from: &Endpoint, message: &MasterMessage) {
        let epoch = self.leader.epoch();
        let leader = self.leader.leader().cloned();
        match message {
            MasterMessage::RegisterFramework { .. }
            | MasterMessage::ReregisterFramework { .. }
            | MasterMessage::UnregisterFramework { .. }
            | MasterMessage::LaunchTasks { .. }
            | MasterMessage::KillTask { .. }
            | MasterMessage::FrameworkToExecutor { .. } => {
                self.post(from.clone(),
                    SchedulerMessage::LeaderRedirect { epoch, leader },
                );
            }
            MasterMessage::RegisterSlave { .. }
            | MasterMessage::ReregisterSlave { .. }
            | MasterMessage::UnregisterSlave { .. }
            | MasterMessage::StatusUpdate { .. }
            | MasterMessage::ExecutorToFramework { .. }
            | MasterMessage::Heartbeat { .. } => {
                self.post(from.clone(),
                    SlaveMessage::LeaderRedirect { epoch, leader },
                );
            }
        }
    }
}
