use std::mem;

use keel_server::actor::{Actor, ActorAction, ActorContext};
use log::{error, info};

use crate::allocator::SimpleAllocator;
use crate::election::LeaderTracker;
use crate::master::state::MasterState;
use crate::master::{MasterActor, MasterEvent, MasterOptions};
use crate::message::MasterMessage;
use crate::net::{self, NetEvent, ServerMonitor};

#[async_trait::async_trait]
impl Actor for MasterActor {
    type Message = MasterEvent;
    type Options = MasterOptions;

    fn name() -> &'static str {
        "MasterActor"
    }

    fn new(mut options: MasterOptions) -> Self {
        let allocator = options
            .allocator
            .take()
            .unwrap_or_else(|| Box::new(SimpleAllocator::new()));
        Self {
            options,
            server: ServerMonitor::new(),
            sender: None,
            allocator,
            state: MasterState::new(0),
            leader: LeaderTracker::new(),
            fault_tolerant: false,
            leading: false,
            reconciling: false,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("starting master");
        let listen_host = self.options.listen_host.clone();
        let listen_port = self.options.port;
        let server = mem::take(&mut self.server);
        self.server = server
            .start(net::serve::<MasterMessage, Self, _>(
                listen_host,
                listen_port,
                ctx.handle().clone(),
                |event| match event {
                    NetEvent::Ready { port, signal } => MasterEvent::ServerReady { port, signal },
                    NetEvent::Message(envelope) => MasterEvent::Message(envelope),
                    NetEvent::Exited { peer } => MasterEvent::PeerExited { peer },
                },
            ))
            .await;
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: MasterEvent) -> ActorAction {
        match message {
            MasterEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            MasterEvent::Message(envelope) => self.handle_message(ctx, envelope),
            MasterEvent::PeerExited { peer } => self.handle_peer_exited(ctx, peer),
            MasterEvent::Leader(event) => self.handle_leader(ctx, event),
            MasterEvent::ReconciliationExpired { epoch } => {
                self.handle_reconciliation_expired(ctx, epoch)
            }
            MasterEvent::ProbeSlave { slave_id, deadline } => {
                self.handle_probe_slave(ctx, slave_id, deadline)
            }
            MasterEvent::GetState { result } => self.handle_get_state(ctx, result),
            MasterEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        let server = mem::take(&mut self.server);
        server.stop().await;
        if let Some(endpoint) = self.sender.as_ref().map(|sender| sender.local().clone()) {
            info!("master {endpoint} has stopped");
        } else {
            error!("master stopped before its endpoint was bound");
        }
    }
}
