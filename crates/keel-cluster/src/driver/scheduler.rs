use std::mem;
use std::time::Duration;

use keel_server::actor::{Actor, ActorAction, ActorContext, ActorHandle};
use keel_server::RetryStrategy;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::election::{ElectionBackend, LeaderEvent, LeaderTracker};
use crate::id::{FrameworkId, OfferId, SlaveId, TaskId};
use crate::message::{
    FrameworkInfo, MasterMessage, SchedulerMessage, SlaveOffer, StatusUpdate, TaskDescription,
};
use crate::net::{self, Endpoint, Envelope, MessageSender, NetEvent, ServerMonitor};

const REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The callbacks a framework implements on its scheduler side.
/// All callbacks run on the driver's message loop.
pub trait Scheduler: Send + 'static {
    fn registered(&mut self, driver: &SchedulerDriver, framework_id: FrameworkId);
    fn resource_offer(&mut self, driver: &SchedulerDriver, offer_id: OfferId, offers: &[SlaveOffer]);
    fn status_update(&mut self, driver: &SchedulerDriver, update: &StatusUpdate);
    fn framework_message(&mut self, driver: &SchedulerDriver, slave_id: SlaveId, data: &[u8]);
    fn error(&mut self, driver: &SchedulerDriver, message: &str);
}

/// The scheduler's view of its driver: non-blocking sends into the
/// driver's loop, safe to call from within callbacks.
#[derive(Clone)]
pub struct SchedulerDriver {
    handle: ActorHandle<SchedulerDriverActor>,
}

impl SchedulerDriver {
    pub fn new(handle: ActorHandle<SchedulerDriverActor>) -> Self {
        Self { handle }
    }

    /// Accept (part of) an offer by launching tasks against it.
    /// An empty task list declines the whole offer.
    pub fn launch_tasks(&self, offer_id: OfferId, tasks: Vec<TaskDescription>) {
        self.post(SchedulerEvent::LaunchTasks { offer_id, tasks });
    }

    pub fn kill_task(&self, task_id: TaskId) {
        self.post(SchedulerEvent::KillTask { task_id });
    }

    pub fn send_framework_message(&self, slave_id: SlaveId, data: Vec<u8>) {
        self.post(SchedulerEvent::SendFrameworkMessage { slave_id, data });
    }

    /// Unregister from the master and stop the driver.
    pub fn stop(&self) {
        self.post(SchedulerEvent::Stop);
    }

    fn post(&self, event: SchedulerEvent) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if handle.send(event).await.is_err() {
                debug!("scheduler driver is gone");
            }
        });
    }
}

pub struct SchedulerDriverOptions {
    pub framework: FrameworkInfo,
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    /// Where to learn the current master. Required.
    pub election: Option<ElectionBackend>,
    pub retry: RetryStrategy,
    pub scheduler: Box<dyn Scheduler>,
}

pub enum SchedulerEvent {
    ServerReady {
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Message(Envelope<SchedulerMessage>),
    PeerExited {
        peer: Endpoint,
    },
    Leader(LeaderEvent),
    LaunchTasks {
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
    },
    KillTask {
        task_id: TaskId,
    },
    SendFrameworkMessage {
        slave_id: SlaveId,
        data: Vec<u8>,
    },
    /// Re-send the registration if the master has not acknowledged it.
    RegistrationRetry,
    /// Graceful unregistration followed by stop.
    Stop,
}

pub struct SchedulerDriverActor {
    options: SchedulerDriverOptions,
    server: ServerMonitor,
    sender: Option<MessageSender>,
    leader: LeaderTracker,
    framework_id: Option<FrameworkId>,
    registered: bool,
    /// The epoch whose master last acknowledged our registration.
    registered_epoch: u64,
}

#[async_trait::async_trait]
impl Actor for SchedulerDriverActor {
    type Message = SchedulerEvent;
    type Options = SchedulerDriverOptions;

    fn name() -> &'static str {
        "SchedulerDriverActor"
    }

    fn new(options: SchedulerDriverOptions) -> Self {
        Self {
            options,
            server: ServerMonitor::new(),
            sender: None,
            leader: LeaderTracker::new(),
            framework_id: None,
            registered: false,
            registered_epoch: 0,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let listen_host = self.options.listen_host.clone();
        let listen_port = self.options.listen_port;
        let server = mem::take(&mut self.server);
        self.server = server
            .start(net::serve::<SchedulerMessage, Self, _>(
                listen_host,
                listen_port,
                ctx.handle().clone(),
                |event| match event {
                    NetEvent::Ready { port, signal } => SchedulerEvent::ServerReady { port, signal },
                    NetEvent::Message(envelope) => SchedulerEvent::Message(envelope),
                    NetEvent::Exited { peer } => SchedulerEvent::PeerExited { peer },
                },
            ))
            .await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: SchedulerEvent) -> ActorAction {
        match message {
            SchedulerEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            SchedulerEvent::Message(envelope) => self.handle_message(ctx, envelope),
            SchedulerEvent::PeerExited { peer } => self.handle_peer_exited(ctx, peer),
            SchedulerEvent::Leader(event) => self.handle_leader(ctx, event),
            SchedulerEvent::LaunchTasks { offer_id, tasks } => {
                self.handle_launch_tasks(ctx, offer_id, tasks)
            }
            SchedulerEvent::KillTask { task_id } => self.handle_kill_task(ctx, task_id),
            SchedulerEvent::SendFrameworkMessage { slave_id, data } => {
                self.handle_send_framework_message(ctx, slave_id, data)
            }
            SchedulerEvent::RegistrationRetry => self.handle_registration_retry(ctx),
            SchedulerEvent::Stop => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        // Unregister best-effort so the master reclaims our resources
        // without waiting for the transport to fail.
        if let (Some(sender), Some(framework_id), Some(master)) = (
            self.sender.as_ref(),
            self.framework_id,
            self.leader.leader().cloned(),
        ) {
            if self.registered {
                let _ = sender.post(
                    &master,
                    self.leader.epoch(),
                    MasterMessage::UnregisterFramework { framework_id },
                );
            }
        }
        let server = mem::take(&mut self.server);
        server.stop().await;
        info!("scheduler driver has stopped");
    }
}

impl SchedulerDriverActor {
    fn handle_server_ready(
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
        let endpoint = Endpoint::new("scheduler", self.options.external_host.clone(), port);
        self.sender = Some(MessageSender::new(endpoint, self.options.retry.clone()));
        let Some(backend) = self.options.election.take() else {
            error!("scheduler driver started without an election backend");
            return ActorAction::Stop;
        };
        let _ = crate::election::watch(backend, ctx.handle().clone(), SchedulerEvent::Leader);
        ActorAction::Continue
    }

    fn handle_leader(&mut self, ctx: &mut ActorContext<Self>, event: LeaderEvent) -> ActorAction {
        if !self.leader.observe(&event) {
            return ActorAction::Continue;
        }
        if self.leader.leader().is_none() {
            warn!("no leading master known, pausing");
            return ActorAction::Continue;
        }
        self.send_registration(ctx);
        ActorAction::Continue
    }

    /// Send the (re-)registration for the current epoch and keep
    /// re-sending until a master of this epoch acknowledges it.
    fn send_registration(&mut self, ctx: &mut ActorContext<Self>) {
        let Some(master) = self.leader.leader().cloned() else {
            return;
        };
        let epoch = self.leader.epoch();
        let message = match self.framework_id {
            Some(framework_id) => MasterMessage::ReregisterFramework {
                framework_id,
                framework: self.options.framework.clone(),
            },
            None => MasterMessage::RegisterFramework {
                framework: self.options.framework.clone(),
            },
        };
        info!("registering with master {master} at epoch {epoch}");
        self.post(master, epoch, message);
        ctx.send_with_delay(SchedulerEvent::RegistrationRetry, REGISTRATION_RETRY_INTERVAL);
    }

    fn handle_registration_retry(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        if self.leader.leader().is_some() && self.registered_epoch < self.leader.epoch() {
            debug!("registration not acknowledged yet, retrying");
            self.send_registration(ctx);
        }
        ActorAction::Continue
    }

    fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        envelope: Envelope<SchedulerMessage>,
    ) -> ActorAction {
        let Envelope { from, epoch, message } = envelope;
        if self.leader.is_stale(epoch) {
            debug!("dropping message with stale epoch {epoch} from {from}");
            return ActorAction::Continue;
        }
        let driver = SchedulerDriver::new(ctx.handle().clone());
        match message {
            SchedulerMessage::FrameworkRegistered { framework_id } => {
                self.framework_id = Some(framework_id);
                self.registered_epoch = self.leader.epoch();
                if !self.registered {
                    self.registered = true;
                    info!("registered as framework {framework_id}");
                    self.options.scheduler.registered(&driver, framework_id);
                }
                ActorAction::Continue
            }
            SchedulerMessage::ResourceOffer { offer_id, offers } => {
                self.options
                    .scheduler
                    .resource_offer(&driver, offer_id, &offers);
                ActorAction::Continue
            }
            SchedulerMessage::StatusUpdate(update) => {
                self.options.scheduler.status_update(&driver, &update);
                ActorAction::Continue
            }
            SchedulerMessage::ExecutorToFramework { slave_id, data } => {
                self.options
                    .scheduler
                    .framework_message(&driver, slave_id, &data);
                ActorAction::Continue
            }
            SchedulerMessage::LeaderRedirect { epoch, leader } => {
                self.handle_leader(ctx, LeaderEvent { epoch, leader })
            }
            SchedulerMessage::FrameworkError { message } => {
                warn!("master reported a framework error: {message}");
                self.options.scheduler.error(&driver, &message);
                ActorAction::Continue
            }
        }
    }

    fn handle_peer_exited(&mut self, _ctx: &mut ActorContext<Self>, peer: Endpoint) -> ActorAction {
        if self.leader.leader() == Some(&peer) {
            warn!("lost connection to master {peer}, awaiting election");
        }
        ActorAction::Continue
    }

    fn handle_launch_tasks(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
    ) -> ActorAction {
        let Some(framework_id) = self.framework_id else {
            warn!("cannot launch tasks before registration");
            return ActorAction::Continue;
        };
        self.post_to_master(MasterMessage::LaunchTasks {
                framework_id,
                offer_id,
                tasks,
            },
        );
        ActorAction::Continue
    }

    fn handle_kill_task(&mut self, _ctx: &mut ActorContext<Self>, task_id: TaskId) -> ActorAction {
        let Some(framework_id) = self.framework_id else {
            return ActorAction::Continue;
        };
        self.post_to_master(MasterMessage::KillTask {
                framework_id,
                task_id,
            },
        );
        ActorAction::Continue
    }

    fn handle_send_framework_message(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        data: Vec<u8>,
    ) -> ActorAction {
        let Some(framework_id) = self.framework_id else {
            return ActorAction::Continue;
        };
        self.post_to_master(MasterMessage::FrameworkToExecutor {
                framework_id,
                slave_id,
                data,
            },
        );
        ActorAction::Continue
    }

    fn post_to_master(&mut self, message: MasterMessage) {
        let Some(master) = self.leader.leader().cloned() else {
            warn!("no leading master known, dropping outbound message");
            return;
        };
        let epoch = self.leader.epoch();
        self.post(master, epoch, message);
    }

    fn post(&mut self, to: Endpoint, epoch: u64, message: MasterMessage) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if let Err(e) = sender.post(&to, epoch, message) {
            debug!("failed to send to {to}: {e}");
        }
    }
}
