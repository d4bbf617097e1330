//! Wire-level tests that speak the framed protocol directly, covering
//! behavior a well-behaved driver never triggers: transport loss,
//! missed heartbeats, and stale-epoch traffic.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use keel_cluster::codec;
use keel_cluster::election::{ElectionBackend, LeaderEvent};
use keel_cluster::master::{MasterActor, MasterEvent, MasterOptions, MasterSnapshot};
use keel_cluster::message::{ExecutorInfo, FrameworkInfo, MasterMessage, SchedulerMessage};
use keel_cluster::net::{Endpoint, Envelope};
use keel_cluster::resource::Resources;
use keel_server::actor::{ActorHandle, ActorSystem};
use keel_server::RetryStrategy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

const WAIT: Duration = Duration::from_secs(10);

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn master_options(port: u16, election: Option<ElectionBackend>) -> MasterOptions {
    MasterOptions {
        listen_host: "127.0.0.1".to_string(),
        port,
        external_host: "127.0.0.1".to_string(),
        allocator: None,
        election,
        reconciliation_window: Duration::from_millis(300),
        slave_heartbeat_timeout: Duration::from_secs(60),
        retry: RetryStrategy::Fixed {
            max_count: 3,
            delay: Duration::from_millis(100),
        },
    }
}

fn framework_info() -> FrameworkInfo {
    FrameworkInfo {
        name: "raw".to_string(),
        user: "nobody".to_string(),
        executor: ExecutorInfo {
            uri: String::new(),
            data: vec![],
        },
    }
}

async fn master_state(handle: &ActorHandle<MasterActor>) -> MasterSnapshot {
    let (tx, rx) = oneshot::channel();
    handle
        .send(MasterEvent::GetState { result: tx })
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap()
}

async fn wait_for_master<F>(handle: &ActorHandle<MasterActor>, predicate: F) -> MasterSnapshot
where
    F: Fn(&MasterSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = master_state(handle).await;
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for master state: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// A hand-rolled protocol participant: a listener for replies (the
/// master dials peers back) and an outbound framed connection.
struct RawPeer {
    endpoint: Endpoint,
    listener: TcpListener,
    outbound: Option<FramedWrite<TcpStream, LengthDelimitedCodec>>,
    inbound: Option<FramedRead<TcpStream, LengthDelimitedCodec>>,
}

impl RawPeer {
    async fn bind(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            endpoint: Endpoint::new(name, "127.0.0.1", port),
            listener,
            outbound: None,
            inbound: None,
        }
    }

    async fn send<M: Serialize>(&mut self, to: &Endpoint, epoch: u64, message: M) {
        if self.outbound.is_none() {
            let stream = TcpStream::connect(to.addr()).await.unwrap();
            self.outbound = Some(FramedWrite::new(stream, codec::new_codec()));
        }
        let envelope = Envelope {
            from: self.endpoint.clone(),
            epoch,
            message,
        };
        let bytes = codec::encode(&envelope).unwrap();
        self.outbound.as_mut().unwrap().send(bytes).await.unwrap();
    }

    /// Read the next reply, accepting the peer's dial-back first if
    /// necessary. Returns [None] on a short timeout.
    async fn try_read<M: DeserializeOwned>(&mut self) -> Option<Envelope<M>> {
        if self.inbound.is_none() {
            match timeout(Duration::from_millis(300), self.listener.accept()).await {
                Ok(Ok((stream, _))) => {
                    self.inbound = Some(FramedRead::new(stream, codec::new_codec()));
                }
                _ => return None,
            }
        }
        let frames = self.inbound.as_mut().unwrap();
        match timeout(Duration::from_millis(300), frames.next()).await {
            Ok(Some(Ok(frame))) => Some(codec::decode(&frame).unwrap()),
            _ => None,
        }
    }

    /// Drop the outbound connection; the peer observes EOF.
    fn disconnect(&mut self) {
        self.outbound = None;
    }
}

#[tokio::test]
async fn test_framework_transport_loss_unregisters_it() {
    let port = free_port();
    let master = Endpoint::new("master", "127.0.0.1", port);
    let mut system = ActorSystem::new();
    let handle = system.spawn::<MasterActor>(master_options(port, None));

    let mut peer = RawPeer::bind("scheduler").await;
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        peer.send(
            &master,
            1,
            MasterMessage::RegisterFramework {
                framework: framework_info(),
            },
        )
        .await;
        if let Some(reply) = peer.try_read::<SchedulerMessage>().await {
            match reply.message {
                SchedulerMessage::FrameworkRegistered { .. } => break,
                _ => {}
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("framework registration was never acknowledged");
        }
    }
    wait_for_master(&handle, |snapshot| snapshot.frameworks.len() == 1).await;

    // Closing the transport must clean the framework up.
    peer.disconnect();
    wait_for_master(&handle, |snapshot| snapshot.frameworks.is_empty()).await;
}

#[tokio::test]
async fn test_silent_slave_is_declared_lost() {
    let port = free_port();
    let master = Endpoint::new("master", "127.0.0.1", port);
    let mut options = master_options(port, None);
    options.slave_heartbeat_timeout = Duration::from_millis(300);
    let mut system = ActorSystem::new();
    let handle = system.spawn::<MasterActor>(options);

    let mut peer = RawPeer::bind("slave").await;
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        peer.send(
            &master,
            1,
            MasterMessage::RegisterSlave {
                hostname: "node1".to_string(),
                resources: "cpus:4;mem:1024".parse::<Resources>().unwrap(),
            },
        )
        .await;
        if peer
            .try_read::<keel_cluster::message::SlaveMessage>()
            .await
            .is_some()
        {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("slave registration was never acknowledged");
        }
    }
    wait_for_master(&handle, |snapshot| snapshot.slaves.len() == 1).await;

    // The transport stays open but no heartbeat ever arrives; the
    // liveness probe declares the slave lost.
    let snapshot = wait_for_master(&handle, |snapshot| snapshot.slaves.is_empty()).await;
    assert!(snapshot.offers.is_empty());
}

#[tokio::test]
async fn test_stale_epoch_traffic_is_dropped() {
    let port = free_port();
    let master = Endpoint::new("master", "127.0.0.1", port);
    let (events, rx) = mpsc::channel(8);
    let mut system = ActorSystem::new();
    let handle = system.spawn::<MasterActor>(master_options(
        port,
        Some(ElectionBackend::Scripted { events: rx }),
    ));
    events
        .send(LeaderEvent {
            epoch: 3,
            leader: Some(master.clone()),
        })
        .await
        .unwrap();
    wait_for_master(&handle, |snapshot| {
        snapshot.leading && !snapshot.reconciling
    })
    .await;

    let mut peer = RawPeer::bind("scheduler").await;
    // A register stamped with a superseded epoch is silently dropped.
    peer.send(
        &master,
        2,
        MasterMessage::RegisterFramework {
            framework: framework_info(),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = master_state(&handle).await;
    assert!(snapshot.frameworks.is_empty());

    // The same message at the current epoch is accepted.
    peer.send(
        &master,
        3,
        MasterMessage::RegisterFramework {
            framework: framework_info(),
        },
    )
    .await;
    wait_for_master(&handle, |snapshot| snapshot.frameworks.len() == 1).await;
}
