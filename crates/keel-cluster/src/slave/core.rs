use std::mem;

use keel_server::actor::{Actor, ActorAction, ActorContext};
use log::{info, warn};

use crate::election::LeaderTracker;
use crate::message::SlaveMessage;
use crate::net::{self, NetEvent, ServerMonitor};
use crate::slave::state::SlaveState;
use crate::slave::{SlaveActor, SlaveEvent, SlaveOptions};

#[async_trait::async_trait]
impl Actor for SlaveActor {
    type Message = SlaveEvent;
    type Options = SlaveOptions;

    fn name() -> &'static str {
        "SlaveActor"
    }

    fn new(options: SlaveOptions) -> Self {
        let state = SlaveState::new(options.resources.clone());
        Self {
            options,
            server: ServerMonitor::new(),
            sender: None,
            state,
            leader: LeaderTracker::new(),
            master: None,
            slave_id: None,
            registered_epoch: 0,
            heartbeat_started: false,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("starting slave with resources {}", self.options.resources);
        let listen_host = self.options.listen_host.clone();
        let listen_port = self.options.port;
        let server = mem::take(&mut self.server);
        self.server = server
            .start(net::serve::<SlaveMessage, Self, _>(
                listen_host,
                listen_port,
                ctx.handle().clone(),
                |event| match event {
                    NetEvent::Ready { port, signal } => SlaveEvent::ServerReady { port, signal },
                    NetEvent::Message(envelope) => SlaveEvent::Message(envelope),
                    NetEvent::Exited { peer } => SlaveEvent::PeerExited { peer },
                },
            ))
            .await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: SlaveEvent) -> ActorAction {
        match message {
            SlaveEvent::ServerReady { port, signal } => self.handle_server_ready(ctx, port, signal),
            SlaveEvent::Message(envelope) => self.handle_message(ctx, envelope),
            SlaveEvent::PeerExited { peer } => self.handle_peer_exited(ctx, peer),
            SlaveEvent::Leader(event) => self.handle_leader(ctx, event),
            SlaveEvent::ExecutorLaunched {
                framework_id,
                status,
            } => self.handle_executor_launched(ctx, framework_id, status),
            SlaveEvent::ExecutorLaunchFailed {
                framework_id,
                message,
            } => self.handle_executor_launch_failed(ctx, framework_id, message),
            SlaveEvent::ExecutorExited {
                framework_id,
                status,
            } => self.handle_executor_exited(ctx, framework_id, status),
            SlaveEvent::ExecutorRegistrationTimeout { framework_id } => {
                self.handle_executor_registration_timeout(ctx, framework_id)
            }
            SlaveEvent::KillTaskTimeout {
                framework_id,
                task_id,
            } => self.handle_kill_task_timeout(ctx, framework_id, task_id),
            SlaveEvent::RegistrationRetry => self.handle_registration_retry(ctx),
            SlaveEvent::Heartbeat => self.handle_heartbeat(ctx),
            SlaveEvent::GetState { result } => self.handle_get_state(ctx, result),
            SlaveEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        // Unregister best-effort, then take the executors down.
        if let (Some(sender), Some(slave_id), Some(master)) =
            (self.sender.as_ref(), self.slave_id, self.master.as_ref())
        {
            let _ = sender.post(
                master,
                self.leader.epoch(),
                crate::message::MasterMessage::UnregisterSlave { slave_id },
            );
        }
        if let Err(e) = self.options.isolation.stop().await {
            warn!("failed to stop isolation module: {e}");
        }
        let server = mem::take(&mut self.server);
        server.stop().await;
        info!("slave has stopped");
    }
}
