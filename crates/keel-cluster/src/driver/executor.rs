use std::mem;

use keel_server::actor::{Actor, ActorAction, ActorContext, ActorHandle};
use keel_server::RetryStrategy;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::error::{ClusterError, ClusterResult};
use crate::id::{FrameworkId, TaskId};
use crate::isolation::{ENV_FRAMEWORK_ID, ENV_SLAVE_ENDPOINT};
use crate::message::{ExecutorMessage, SlaveMessage, TaskDescription, TaskState};
use crate::net::{self, Endpoint, Envelope, MessageSender, NetEvent, ServerMonitor};

/// The callbacks a framework implements on its executor side.
/// All callbacks run on the driver's message loop; long work belongs in
/// tasks the executor spawns itself, reporting back through the driver.
pub trait Executor: Send + 'static {
    fn registered(
        &mut self,
        driver: &ExecutorDriver,
        framework_id: FrameworkId,
        slave_id: crate::id::SlaveId,
        data: &[u8],
    );
    fn launch_task(&mut self, driver: &ExecutorDriver, task: &TaskDescription);
    fn kill_task(&mut self, driver: &ExecutorDriver, task_id: TaskId);
    fn framework_message(&mut self, driver: &ExecutorDriver, data: &[u8]);
    fn shutdown(&mut self, driver: &ExecutorDriver);
}

/// The executor's view of its driver: non-blocking sends into the
/// driver's loop, safe to call from within callbacks.
#[derive(Clone)]
pub struct ExecutorDriver {
    handle: ActorHandle<ExecutorDriverActor>,
}

impl ExecutorDriver {
    pub fn new(handle: ActorHandle<ExecutorDriverActor>) -> Self {
        Self { handle }
    }

    pub fn send_status_update(&self, task_id: TaskId, state: TaskState, message: Option<String>) {
        self.post(ExecutorEvent::SendStatusUpdate {
            task_id,
            state,
            message,
        });
    }

    pub fn send_framework_message(&self, data: Vec<u8>) {
        self.post(ExecutorEvent::SendFrameworkMessage { data });
    }

    pub fn stop(&self) {
        self.post(ExecutorEvent::Shutdown);
    }

    fn post(&self, event: ExecutorEvent) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if handle.send(event).await.is_err() {
                debug!("executor driver is gone");
            }
        });
    }
}

pub struct ExecutorDriverOptions {
    pub slave: Endpoint,
    pub framework_id: FrameworkId,
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    pub retry: RetryStrategy,
    pub executor: Box<dyn Executor>,
}

impl ExecutorDriverOptions {
    /// Build options from the environment a forked executor inherits
    /// from the process isolation backend.
    pub fn from_env(executor: Box<dyn Executor>) -> ClusterResult<Self> {
        let slave = std::env::var(ENV_SLAVE_ENDPOINT)
            .map_err(|_| {
                ClusterError::InvalidArgument(format!("{ENV_SLAVE_ENDPOINT} is not set"))
            })?
            .parse::<Endpoint>()?;
        let framework_id = std::env::var(ENV_FRAMEWORK_ID)
            .map_err(|_| {
                ClusterError::InvalidArgument(format!("{ENV_FRAMEWORK_ID} is not set"))
            })?
            .parse::<FrameworkId>()?;
        Ok(Self {
            slave,
            framework_id,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 0,
            external_host: "127.0.0.1".to_string(),
            retry: RetryStrategy::Fixed {
                max_count: 5,
                delay: std::time::Duration::from_secs(1),
            },
            executor,
        })
    }
}

pub enum ExecutorEvent {
    ServerReady {
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Message(Envelope<ExecutorMessage>),
    PeerExited {
        peer: Endpoint,
    },
    SendStatusUpdate {
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    },
    SendFrameworkMessage {
        data: Vec<u8>,
    },
    /// Re-send the registration if the slave has not acknowledged it.
    RegistrationRetry,
    Shutdown,
}

pub struct ExecutorDriverActor {
    options: ExecutorDriverOptions,
    server: ServerMonitor,
    sender: Option<MessageSender>,
    registered: bool,
}

#[async_trait::async_trait]
impl Actor for ExecutorDriverActor {
    type Message = ExecutorEvent;
    type Options = ExecutorDriverOptions;

    fn name() -> &'static str {
        "ExecutorDriverActor"
    }

    fn new(options: ExecutorDriverOptions) -> Self {
        Self {
            options,
            server: ServerMonitor::new(),
            sender: None,
            registered: false,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        let listen_host = self.options.listen_host.clone();
        let listen_port = self.options.listen_port;
        let server = mem::take(&mut self.server);
        self.server = server
            .start(net::serve::<ExecutorMessage, Self, _>(
                listen_host,
                listen_port,
                ctx.handle().clone(),
                |event| match event {
                    NetEvent::Ready { port, signal } => ExecutorEvent::ServerReady { port, signal },
                    NetEvent::Message(envelope) => ExecutorEvent::Message(envelope),
                    NetEvent::Exited { peer } => ExecutorEvent::PeerExited { peer },
                },
            ))
            .await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: ExecutorEvent) -> ActorAction {
        match message {
            ExecutorEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            ExecutorEvent::Message(envelope) => self.handle_message(ctx, envelope),
            ExecutorEvent::PeerExited { peer } => self.handle_peer_exited(ctx, peer),
            ExecutorEvent::SendStatusUpdate {
                task_id,
                state,
                message,
            } => self.handle_send_status_update(ctx, task_id, state, message),
            ExecutorEvent::SendFrameworkMessage { data } => {
                self.handle_send_framework_message(ctx, data)
            }
            ExecutorEvent::RegistrationRetry => self.handle_registration_retry(ctx),
            ExecutorEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        let server = mem::take(&mut self.server);
        server.stop().await;
        debug!(
            "executor driver for framework {} has stopped",
            self.options.framework_id
        );
    }
}

impl ExecutorDriverActor {
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
        let framework_id = self.options.framework_id;
        let endpoint = Endpoint::new(
            format!("executor({framework_id})"),
            self.options.external_host.clone(),
            port,
        );
        self.sender = Some(MessageSender::new(endpoint, self.options.retry.clone()));
        self.send_registration(ctx);
        ActorAction::Continue
    }

    /// Send the registration and keep re-sending until the slave
    /// acknowledges it.
    fn send_registration(&mut self, ctx: &mut ActorContext<Self>) {
        let framework_id = self.options.framework_id;
        self.post(
            self.options.slave.clone(),
            SlaveMessage::RegisterExecutor { framework_id },
        );
        ctx.send_with_delay(
            ExecutorEvent::RegistrationRetry,
            std::time::Duration::from_secs(1),
        );
    }

    fn handle_registration_retry(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        if !self.registered {
            debug!("executor registration not acknowledged yet, retrying");
            self.send_registration(ctx);
        }
        ActorAction::Continue
    }

    fn handle_message(
        &mut self,
        ctx: &mut ActorContext<Self>,
        envelope: Envelope<ExecutorMessage>,
    ) -> ActorAction {
        let Envelope { from, message, .. } = envelope;
        if from != self.options.slave {
            debug!("ignoring message from {from}");
            return ActorAction::Continue;
        }
        let driver = ExecutorDriver::new(ctx.handle().clone());
        match message {
            ExecutorMessage::ExecutorRegistered {
                framework_id,
                slave_id,
                data,
            } => {
                if !self.registered {
                    self.registered = true;
                    info!("executor registered with slave {slave_id}");
                    self.options
                        .executor
                        .registered(&driver, framework_id, slave_id, &data);
                }
                ActorAction::Continue
            }
            ExecutorMessage::RunTask { task } => {
                self.options.executor.launch_task(&driver, &task);
                ActorAction::Continue
            }
            ExecutorMessage::KillTask { task_id } => {
                self.options.executor.kill_task(&driver, task_id);
                ActorAction::Continue
            }
            ExecutorMessage::FrameworkToExecutor { data } => {
                self.options.executor.framework_message(&driver, &data);
                ActorAction::Continue
            }
            ExecutorMessage::Shutdown => {
                self.options.executor.shutdown(&driver);
                ActorAction::Stop
            }
        }
    }

    fn handle_peer_exited(&mut self, ctx: &mut ActorContext<Self>, peer: Endpoint) -> ActorAction {
        if peer == self.options.slave {
            warn!("slave {peer} went away, shutting down executor");
            let driver = ExecutorDriver::new(ctx.handle().clone());
            self.options.executor.shutdown(&driver);
            return ActorAction::Stop;
        }
        ActorAction::Continue
    }

    fn handle_send_status_update(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    ) -> ActorAction {
        let framework_id = self.options.framework_id;
        self.post(
            self.options.slave.clone(),
            SlaveMessage::ExecutorStatusUpdate {
                framework_id,
                task_id,
                state,
                message,
            },
        );
        ActorAction::Continue
    }

    fn handle_send_framework_message(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        data: Vec<u8>,
    ) -> ActorAction {
        let framework_id = self.options.framework_id;
        self.post(
            self.options.slave.clone(),
            SlaveMessage::ExecutorToFramework { framework_id, data },
        );
        ActorAction::Continue
    }

    /// Executors are not epoch-qualified; their frames carry epoch zero.
    fn post<M>(&mut self, to: Endpoint, message: M)
    where
        M: serde::Serialize + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if let Err(e) = sender.post(&to, 0, message) {
            debug!("failed to send to {to}: {e}");
        }
    }
}

/// Entry point for standalone executor binaries launched by the process
/// isolation backend: read the environment, run the driver, and wait for
/// the slave to shut the executor down.
pub async fn run_executor(executor: Box<dyn Executor>) -> ClusterResult<()> {
    let options = ExecutorDriverOptions::from_env(executor)?;
    let handle = ActorHandle::<ExecutorDriverActor>::new(options);
    handle.wait_for_stop().await;
    Ok(())
}
