use std::mem;
use std::time::Duration;

use keel_server::actor::{ActorAction, ActorContext};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::election::LeaderEvent;
use crate::id::{FrameworkId, SlaveId, TaskId};
use crate::message::{
    ExecutorMessage, FrameworkInfo, MasterMessage, SlaveMessage, StatusUpdate, TaskDescription,
    TaskState,
};
use crate::net::{Endpoint, Envelope, MessageSender};
use crate::slave::state::{ExecutorRecord, ExecutorState};
use crate::slave::{SlaveActor, SlaveEvent, SlaveFrameworkSnapshot, SlaveSnapshot};

const REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_secs(1);

impl SlaveActor {
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
        info!("slave endpoint is ready on port {port}");
        let endpoint = Endpoint::new("slave", self.options.external_host.clone(), port);
        self.sender = Some(MessageSender::new(endpoint, self.options.retry.clone()));

        // Executor exits become ordinary messages on the loop.
        if let Some(mut exits) = self.options.executor_exits.take() {
            let handle = ctx.handle().clone();
            ctx.spawn(async move {
                while let Some(exit) = exits.recv().await {
                    let event = SlaveEvent::ExecutorExited {
                        framework_id: exit.framework_id,
                        status: exit.status,
                    };
                    if handle.send(event).await.is_err() {
                        return;
                    }
                }
            });
        }

        let backend = self
            .options
            .election
            .take()
            .unwrap_or(crate::election::ElectionBackend::Static {
                leader: self.options.master.clone(),
            });
        let _ = crate::election::watch(backend, ctx.handle().clone(), SlaveEvent::Leader);
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
        if let Some(previous) = self.master.take() {
            // Anything still queued for the old master is void now.
            self.forget_peer(&previous);
        }
        let Some(master) = self.leader.leader().cloned() else {
            warn!("no leading master known, pausing");
            return ActorAction::Continue;
        };
        info!("master changed to {master} at epoch {}", self.leader.epoch());
        self.master = Some(master);
        self.send_registration(ctx);
        ActorAction::Continue
    }

    /// Send the (re-)registration for the current epoch and keep
    /// re-sending until a master of this epoch acknowledges it.
    fn send_registration(&mut self, ctx: &mut ActorContext<Self>) {
        let Some(master) = self.master.clone() else {
            return;
        };
        let message = match self.slave_id {
            Some(slave_id) => MasterMessage::ReregisterSlave {
                slave_id,
                hostname: self.options.hostname.clone(),
                resources: self.state.total().clone(),
                tasks: self.state.task_list(),
            },
            None => MasterMessage::RegisterSlave {
                hostname: self.options.hostname.clone(),
                resources: self.state.total().clone(),
            },
        };
        self.post(master, message);
        ctx.send_with_delay(SlaveEvent::RegistrationRetry, REGISTRATION_RETRY_INTERVAL);
    }

    pub(super) fn handle_registration_retry(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> ActorAction {
        if self.master.is_some() && self.registered_epoch < self.leader.epoch() {
            debug!("registration not acknowledged yet, retrying");
            self.send_registration(ctx);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        envelope: Envelope<SlaveMessage>,
    ) -> ActorAction {
        let Envelope {
            from,
            epoch,
            message,
        } = envelope;
        if let SlaveMessage::LeaderRedirect { epoch, leader } = message {
            return self.handle_leader(ctx, LeaderEvent { epoch, leader });
        }
        let master_origin = matches!(
            message,
            SlaveMessage::SlaveRegistered { .. }
                | SlaveMessage::SlaveReregistered { .. }
                | SlaveMessage::RunTask { .. }
                | SlaveMessage::KillTask { .. }
                | SlaveMessage::KillFramework { .. }
                | SlaveMessage::FrameworkToExecutor { .. }
        );
        if master_origin {
            if self.leader.is_stale(epoch) {
                debug!("dropping message with stale epoch {epoch} from {from}");
                return ActorAction::Continue;
            }
            if self.master.as_ref() != Some(&from) {
                debug!("dropping master message from unexpected endpoint {from}");
                return ActorAction::Continue;
            }
        }
        match message {
            SlaveMessage::SlaveRegistered { slave_id } => {
                self.handle_slave_registered(ctx, slave_id)
            }
            SlaveMessage::SlaveReregistered { slave_id } => {
                debug!("re-registered as slave {slave_id}");
                self.registered_epoch = self.leader.epoch();
                ActorAction::Continue
            }
            SlaveMessage::RunTask {
                framework_id,
                framework,
                task,
            } => self.handle_run_task(ctx, framework_id, framework, task),
            SlaveMessage::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(ctx, framework_id, task_id),
            SlaveMessage::KillFramework { framework_id } => {
                self.handle_kill_framework(ctx, framework_id)
            }
            SlaveMessage::FrameworkToExecutor { framework_id, data } => {
                self.handle_framework_to_executor(ctx, framework_id, data)
            }
            SlaveMessage::LeaderRedirect { .. } => ActorAction::Continue,
            SlaveMessage::RegisterExecutor { framework_id } => {
                self.handle_register_executor(ctx, from, framework_id)
            }
            SlaveMessage::ExecutorStatusUpdate {
                framework_id,
                task_id,
                state,
                message,
            } => self.handle_executor_status_update(ctx, from, framework_id, task_id, state, message),
            SlaveMessage::ExecutorToFramework { framework_id, data } => {
                self.handle_executor_to_framework(ctx, from, framework_id, data)
            }
        }
    }

    fn handle_slave_registered(
        &mut self,
        ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
    ) -> ActorAction {
        match self.slave_id {
            None => {
                info!("registered as slave {slave_id}");
                self.slave_id = Some(slave_id);
            }
            Some(existing) if existing == slave_id => {}
            Some(existing) => {
                warn!("master renamed this slave from {existing} to {slave_id}");
                self.slave_id = Some(slave_id);
            }
        }
        self.registered_epoch = self.leader.epoch();
        if !self.heartbeat_started {
            self.heartbeat_started = true;
            ctx.send(SlaveEvent::Heartbeat);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_heartbeat(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        if let (Some(master), Some(slave_id)) = (self.master.clone(), self.slave_id) {
            self.post(master, MasterMessage::Heartbeat { slave_id });
        }
        ctx.send_with_delay(SlaveEvent::Heartbeat, self.options.heartbeat_interval);
        ActorAction::Continue
    }

    fn handle_run_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        task: TaskDescription,
    ) -> ActorAction {
        if self.slave_id.is_none() {
            warn!("dropping task {} before registration", task.task_id);
            return ActorAction::Continue;
        }
        // The master's grants must fit the advertised total; anything
        // else means the two sides disagree on this slave's accounting.
        if !self.state.fits(&task.resources) {
            warn!(
                "task {} of framework {framework_id} exceeds free capacity",
                task.task_id
            );
            self.forward_status(
                ctx,
                framework_id,
                task.task_id,
                TaskState::Lost,
                Some("task resources exceed slave capacity".to_string()),
            );
            return ActorAction::Continue;
        }
        let record = self.state.ensure_framework(framework_id, &framework);
        if record.tasks.contains_key(&task.task_id) {
            warn!("dropping duplicate task {}", task.task_id);
            return ActorAction::Continue;
        }
        let executor_state = record.executor.as_ref().map(|executor| executor.state);
        match executor_state {
            Some(ExecutorState::ShuttingDown) => {
                self.forward_status(
                    ctx,
                    framework_id,
                    task.task_id,
                    TaskState::Lost,
                    Some("executor is shutting down".to_string()),
                );
                return ActorAction::Continue;
            }
            Some(ExecutorState::Running) => {
                self.state.add_task(framework_id, &task);
                self.forward_status(ctx, framework_id, task.task_id, TaskState::Starting, None);
                self.notify_resources_changed(ctx, framework_id);
                if let Some(executor) = self.state.executor_endpoint(framework_id).cloned() {
                    self.post(executor, ExecutorMessage::RunTask { task });
                }
            }
            Some(ExecutorState::Starting) => {
                self.state.add_task(framework_id, &task);
                self.forward_status(ctx, framework_id, task.task_id, TaskState::Starting, None);
                if let Some(record) = self.state.framework_mut(framework_id) {
                    record.queued_tasks.push_back(task);
                }
            }
            None => {
                self.state.add_task(framework_id, &task);
                self.forward_status(ctx, framework_id, task.task_id, TaskState::Starting, None);
                if let Some(record) = self.state.framework_mut(framework_id) {
                    record.queued_tasks.push_back(task);
                    record.executor = Some(ExecutorRecord {
                        state: ExecutorState::Starting,
                        endpoint: None,
                        status: String::new(),
                    });
                }
                self.start_executor(ctx, framework_id);
            }
        }
        ActorAction::Continue
    }

    fn start_executor(&mut self, ctx: &mut ActorContext<Self>, framework_id: FrameworkId) {
        let Some(slave_id) = self.slave_id else {
            return;
        };
        let Some(endpoint) = self.sender.as_ref().map(|sender| sender.local().clone()) else {
            return;
        };
        let Some(info) = self
            .state
            .framework(framework_id)
            .map(|framework| framework.info.clone())
        else {
            return;
        };
        let directory = self
            .options
            .work_dir
            .join(format!("slave-{slave_id}"))
            .join(format!("fw-{framework_id}"))
            .join("executor");
        info!(
            "launching executor for framework {framework_id} in {}",
            directory.display()
        );
        let isolation = self.options.isolation.clone();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let event = match isolation
                .launch_executor(&endpoint, framework_id, &info, &directory)
                .await
            {
                Ok(status) => SlaveEvent::ExecutorLaunched {
                    framework_id,
                    status,
                },
                Err(e) => SlaveEvent::ExecutorLaunchFailed {
                    framework_id,
                    message: e.to_string(),
                },
            };
            let _ = handle.send(event).await;
        });
        ctx.send_with_delay(
            SlaveEvent::ExecutorRegistrationTimeout { framework_id },
            self.options.executor_registration_timeout,
        );
    }

    pub(super) fn handle_executor_launched(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        status: String,
    ) -> ActorAction {
        if let Some(executor) = self
            .state
            .framework_mut(framework_id)
            .and_then(|framework| framework.executor.as_mut())
        {
            executor.status = status;
        }
        ActorAction::Continue
    }

    pub(super) fn handle_executor_launch_failed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        message: String,
    ) -> ActorAction {
        warn!("failed to launch executor for framework {framework_id}: {message}");
        let Some(framework) = self.state.remove_framework(framework_id) else {
            return ActorAction::Continue;
        };
        for task in framework.tasks.values() {
            self.forward_status(
                ctx,
                framework_id,
                task.task_id,
                TaskState::Failed,
                Some(message.clone()),
            );
        }
        ActorAction::Continue
    }

    fn handle_register_executor(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
    ) -> ActorAction {
        let Some(slave_id) = self.slave_id else {
            return ActorAction::Continue;
        };
        let Some(framework) = self.state.framework_mut(framework_id) else {
            warn!("shutting down executor of unknown framework {framework_id}");
            self.post(from, ExecutorMessage::Shutdown);
            return ActorAction::Continue;
        };
        let Some(executor) = framework.executor.as_mut() else {
            warn!("shutting down unexpected executor for framework {framework_id}");
            self.post(from, ExecutorMessage::Shutdown);
            return ActorAction::Continue;
        };
        info!("executor for framework {framework_id} registered at {from}");
        executor.state = ExecutorState::Running;
        executor.endpoint = Some(from.clone());
        let data = framework.info.executor.data.clone();
        self.post(from.clone(),
            ExecutorMessage::ExecutorRegistered {
                framework_id,
                slave_id,
                data,
            },
        );
        // Flush the tasks that arrived while the executor was starting,
        // in arrival order.
        for task in self.state.drain_queue(framework_id) {
            self.post(from.clone(), ExecutorMessage::RunTask { task });
        }
        ActorAction::Continue
    }

    pub(super) fn handle_executor_registration_timeout(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) -> ActorAction {
        let starting = self
            .state
            .framework(framework_id)
            .and_then(|framework| framework.executor.as_ref())
            .is_some_and(|executor| executor.state == ExecutorState::Starting);
        if starting {
            warn!("executor for framework {framework_id} did not register in time");
            self.shut_down_executor(ctx, framework_id);
        }
        ActorAction::Continue
    }

    fn handle_executor_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    ) -> ActorAction {
        if self.state.executor_endpoint(framework_id) != Some(&from) {
            warn!("ignoring status update from unexpected endpoint {from}");
            return ActorAction::Continue;
        }
        if !self.state.apply_update(framework_id, task_id, state) {
            warn!("executor reported on unknown task {task_id}");
            return ActorAction::Continue;
        }
        debug!("task {task_id} of framework {framework_id} is now {state}");
        if state.is_terminal() {
            self.notify_resources_changed(ctx, framework_id);
        }
        self.forward_status(ctx, framework_id, task_id, state, message);
        ActorAction::Continue
    }

    fn handle_kill_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        // A queued task never reached the executor; settle it here.
        if self.state.dequeue_task(framework_id, task_id).is_some() {
            self.state.apply_update(framework_id, task_id, TaskState::Killed);
            self.forward_status(ctx, framework_id, task_id, TaskState::Killed, None);
            return ActorAction::Continue;
        }
        let known = self
            .state
            .framework(framework_id)
            .is_some_and(|framework| framework.tasks.contains_key(&task_id));
        if !known {
            self.forward_status(
                ctx,
                framework_id,
                task_id,
                TaskState::Lost,
                Some("attempted to kill an unknown task".to_string()),
            );
            return ActorAction::Continue;
        }
        match self.state.executor_endpoint(framework_id).cloned() {
            Some(executor) => {
                self.post(executor, ExecutorMessage::KillTask { task_id });
                ctx.send_with_delay(
                    SlaveEvent::KillTaskTimeout {
                        framework_id,
                        task_id,
                    },
                    self.options.kill_timeout,
                );
            }
            None => {
                // No executor to ask; the task can only be gone.
                self.state.apply_update(framework_id, task_id, TaskState::Lost);
                self.forward_status(
                    ctx,
                    framework_id,
                    task_id,
                    TaskState::Lost,
                    Some("no executor for task".to_string()),
                );
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_kill_task_timeout(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        let alive = self
            .state
            .framework(framework_id)
            .is_some_and(|framework| framework.tasks.contains_key(&task_id));
        if alive {
            warn!(
                "executor for framework {framework_id} ignored the kill of task {task_id}"
            );
            self.shut_down_executor(ctx, framework_id);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_executor_exited(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        status: i32,
    ) -> ActorAction {
        let Some(framework) = self.state.framework_mut(framework_id) else {
            return ActorAction::Continue;
        };
        info!("executor for framework {framework_id} exited with status {status}");
        framework.executor = None;
        framework.queued_tasks.clear();
        let task_ids = framework.tasks.keys().copied().collect::<Vec<_>>();
        for task_id in task_ids {
            self.state
                .apply_update(framework_id, task_id, TaskState::Lost);
            self.forward_status(
                ctx,
                framework_id,
                task_id,
                TaskState::Lost,
                Some(format!("executor exited with status {status}")),
            );
        }
        // The framework mirror stays until the master removes it, so late
        // messages can still be resolved.
        ActorAction::Continue
    }

    fn handle_kill_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) -> ActorAction {
        info!("removing framework {framework_id}");
        self.kill_executor_process(ctx, framework_id);
        self.state.remove_framework(framework_id);
        ActorAction::Continue
    }

    fn handle_framework_to_executor(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        data: Vec<u8>,
    ) -> ActorAction {
        match self.state.executor_endpoint(framework_id).cloned() {
            Some(executor) => {
                self.post(executor, ExecutorMessage::FrameworkToExecutor { data });
            }
            None => {
                debug!("dropping framework message for framework {framework_id} with no executor");
            }
        }
        ActorAction::Continue
    }

    fn handle_executor_to_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        from: Endpoint,
        framework_id: FrameworkId,
        data: Vec<u8>,
    ) -> ActorAction {
        if self.state.executor_endpoint(framework_id) != Some(&from) {
            warn!("ignoring framework message from unexpected endpoint {from}");
            return ActorAction::Continue;
        }
        let (Some(master), Some(slave_id)) = (self.master.clone(), self.slave_id) else {
            return ActorAction::Continue;
        };
        self.post(master,
            MasterMessage::ExecutorToFramework {
                framework_id,
                slave_id,
                data,
            },
        );
        ActorAction::Continue
    }

    pub(super) fn handle_peer_exited(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        peer: Endpoint,
    ) -> ActorAction {
        if self.master.as_ref() == Some(&peer) {
            warn!("lost connection to master {peer}, awaiting election");
        } else {
            // Executor deaths are reported by the isolation module, which
            // is authoritative; transport loss alone proves nothing.
            debug!("peer {peer} went away");
        }
        ActorAction::Continue
    }

    pub(super) fn handle_get_state(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<SlaveSnapshot>,
    ) -> ActorAction {
        let frameworks = self
            .state
            .frameworks()
            .map(|(framework_id, framework)| SlaveFrameworkSnapshot {
                framework_id,
                executor: framework.executor.as_ref().map(|executor| executor.state),
                queued_tasks: framework.queued_tasks.len(),
                tasks: framework.tasks.values().cloned().collect(),
            })
            .collect();
        let _ = result.send(SlaveSnapshot {
            slave_id: self.slave_id,
            endpoint: self.sender.as_ref().map(|sender| sender.local().clone()),
            master: self.master.clone(),
            total: self.state.total().clone(),
            used: self.state.used(),
            frameworks,
        });
        ActorAction::Continue
    }

    /// Tell the isolation module how much the framework now holds here,
    /// so backends that enforce limits can adjust them.
    fn notify_resources_changed(&mut self, ctx: &mut ActorContext<Self>, framework_id: FrameworkId) {
        let Some(held) = self
            .state
            .framework(framework_id)
            .map(|framework| framework.held())
        else {
            return;
        };
        let isolation = self.options.isolation.clone();
        ctx.spawn(async move {
            if let Err(e) = isolation.resources_changed(framework_id, &held).await {
                warn!("failed to adjust resources for framework {framework_id}: {e}");
            }
        });
    }

    /// Ask the isolation module to take the executor down and mark it so;
    /// the exit report declares the remaining tasks lost.
    fn shut_down_executor(&mut self, ctx: &mut ActorContext<Self>, framework_id: FrameworkId) {
        if let Some(executor) = self
            .state
            .framework_mut(framework_id)
            .and_then(|framework| framework.executor.as_mut())
        {
            executor.state = ExecutorState::ShuttingDown;
        }
        self.kill_executor_process(ctx, framework_id);
    }

    fn kill_executor_process(&mut self, ctx: &mut ActorContext<Self>, framework_id: FrameworkId) {
        let isolation = self.options.isolation.clone();
        ctx.spawn(async move {
            if let Err(e) = isolation.kill_executor(framework_id).await {
                warn!("failed to kill executor for framework {framework_id}: {e}");
            }
        });
    }

    /// Report a task transition to the master. The sender delivers
    /// frames to any one peer in order and retries transient transport
    /// failures; updates that cannot be delivered at all are dropped,
    /// and the task list travels with re-registration, so a new master
    /// converges anyway.
    fn forward_status(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    ) {
        let (Some(master), Some(slave_id)) = (self.master.clone(), self.slave_id) else {
            warn!("no master to receive the update for task {task_id}");
            return;
        };
        let update = StatusUpdate {
            framework_id,
            task_id,
            slave_id: Some(slave_id),
            state,
            message,
        };
        self.post(master, MasterMessage::StatusUpdate(update));
    }

    fn post<M>(&mut self, to: Endpoint, message: M)
    where
        M: Serialize + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if let Err(e) = sender.post(&to, self.leader.epoch(), message) {
            debug!("failed to send to {to}: {e}");
        }
    }

    fn forget_peer(&mut self, peer: &Endpoint) {
        if let Some(sender) = self.sender.as_ref() {
            sender.forget(peer);
        }
    }
}
