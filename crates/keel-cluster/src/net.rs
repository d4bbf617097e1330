use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use futures::{SinkExt, StreamExt};
use keel_server::actor::{Actor, ActorHandle};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec;
use crate::error::{ClusterError, ClusterResult};

/// A named network identity, rendered `name@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// The socket address of the endpoint's listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, addr) = s
            .split_once('@')
            .ok_or_else(|| ClusterError::InvalidArgument(format!("invalid endpoint: {s}")))?;
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| ClusterError::InvalidArgument(format!("invalid endpoint: {s}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ClusterError::InvalidArgument(format!("invalid endpoint port: {s}")))?;
        if name.is_empty() || host.is_empty() {
            return Err(ClusterError::InvalidArgument(format!(
                "invalid endpoint: {s}"
            )));
        }
        Ok(Self::new(name, host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClusterError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Every wire frame carries the sender's identity and the sender's view
/// of the current master epoch. Receivers drop frames from stale epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub from: Endpoint,
    pub epoch: u64,
    pub message: M,
}

/// Events a listener feeds into the owning actor's loop.
pub enum NetEvent<M> {
    /// The listener is bound. `port` is the actual local port, which
    /// matters when the configured port was zero.
    Ready {
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Message(Envelope<M>),
    /// A peer that had spoken on an inbound connection went away.
    Exited { peer: Endpoint },
}

/// Accept connections and feed decoded envelopes into the actor's loop.
/// Peer death is observed on the inbound connection: once a peer has
/// identified itself in an envelope, EOF or a read error produces an
/// [NetEvent::Exited] for it.
pub async fn serve<M, T, F>(
    listen_host: String,
    listen_port: u16,
    handle: ActorHandle<T>,
    wrap: F,
) -> ClusterResult<()>
where
    M: DeserializeOwned + Send + 'static,
    T: Actor,
    F: Fn(NetEvent<M>) -> T::Message + Send + Sync + Clone + 'static,
{
    let listener = TcpListener::bind((listen_host.as_str(), listen_port)).await?;
    let port = listener.local_addr()?.port();
    let (signal_tx, signal_rx) = oneshot::channel();
    handle
        .send(wrap(NetEvent::Ready {
            port,
            signal: signal_tx,
        }))
        .await
        .map_err(|_| ClusterError::InternalError("listener owner is gone".to_string()))?;

    let mut connections = JoinSet::new();
    let mut signal_rx = signal_rx;
    loop {
        tokio::select! {
            out = listener.accept() => {
                let (stream, addr) = out?;
                debug!("accepted connection from {addr}");
                let handle = handle.clone();
                let wrap = wrap.clone();
                connections.spawn(read_connection(stream, handle, wrap));
            }
            _ = &mut signal_rx => {
                // Dropping the join set aborts all connection readers.
                break;
            }
        }
    }
    Ok(())
}

async fn read_connection<M, T, F>(stream: TcpStream, handle: ActorHandle<T>, wrap: F)
where
    M: DeserializeOwned + Send + 'static,
    T: Actor,
    F: Fn(NetEvent<M>) -> T::Message + Send + Sync + 'static,
{
    let mut frames = FramedRead::new(stream, codec::new_codec());
    let mut peer: Option<Endpoint> = None;
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(x) => x,
            Err(e) => {
                warn!("failed to read frame: {e}");
                break;
            }
        };
        let envelope: Envelope<M> = match codec::decode(&frame) {
            Ok(x) => x,
            Err(e) => {
                warn!("failed to decode frame: {e}");
                break;
            }
        };
        peer = Some(envelope.from.clone());
        if handle.send(wrap(NetEvent::Message(envelope))).await.is_err() {
            return;
        }
    }
    if let Some(peer) = peer {
        let _ = handle.send(wrap(NetEvent::Exited { peer })).await;
    }
}

/// Watches the task serving an agent's endpoint.
pub enum ServerMonitor {
    Stopped,
    Pending {
        handle: JoinHandle<ClusterResult<()>>,
    },
    Running {
        /// The shutdown signal to send to the server.
        signal: oneshot::Sender<()>,
        handle: JoinHandle<ClusterResult<()>>,
        port: u16,
    },
}

impl Default for ServerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMonitor {
    pub fn new() -> Self {
        Self::Stopped
    }

    pub async fn start(
        self,
        f: impl Future<Output = ClusterResult<()>> + Send + 'static,
    ) -> Self {
        self.stop().await;
        Self::Pending {
            handle: tokio::spawn(f),
        }
    }

    pub fn ready(self, signal: oneshot::Sender<()>, port: u16) -> ClusterResult<Self> {
        match self {
            Self::Pending { handle } => Ok(Self::Running {
                signal,
                handle,
                port,
            }),
            _ => Err(ClusterError::InternalError(
                "the server must be in pending state before it can be ready".to_string(),
            )),
        }
    }

    pub async fn stop(self) {
        match self {
            Self::Stopped => {}
            Self::Pending { handle } => {
                handle.abort();
            }
            Self::Running {
                signal,
                handle,
                port: _,
            } => {
                let _ = signal.send(());
                let _ = handle.await;
            }
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Running { port, .. } => Some(*port),
            _ => None,
        }
    }
}

/// Best-effort, at-most-once message delivery to named peers.
///
/// [MessageSender::post] is synchronous: it encodes the envelope and
/// enqueues it for a per-destination writer task. Because enqueueing
/// happens on the caller's message loop, messages to any one peer leave
/// in exactly the order the loop produced them (FIFO per link). The
/// writer dials lazily, retries a failed frame according to the retry
/// strategy, and drops it when the retries are exhausted.
#[derive(Clone)]
pub struct MessageSender {
    inner: Arc<MessageSenderInner>,
}

struct MessageSenderInner {
    local: Endpoint,
    retry: keel_server::RetryStrategy,
    queues: StdMutex<HashMap<String, mpsc::UnboundedSender<bytes::Bytes>>>,
}

impl MessageSender {
    pub fn new(local: Endpoint, retry: keel_server::RetryStrategy) -> Self {
        Self {
            inner: Arc::new(MessageSenderInner {
                local,
                retry,
                queues: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn local(&self) -> &Endpoint {
        &self.inner.local
    }

    pub fn post<M: Serialize>(&self, to: &Endpoint, epoch: u64, message: M) -> ClusterResult<()> {
        let envelope = Envelope {
            from: self.inner.local.clone(),
            epoch,
            message,
        };
        let bytes = codec::encode(&envelope)?;
        let addr = to.addr();
        let mut queues = self
            .inner
            .queues
            .lock()
            .map_err(|_| ClusterError::InternalError("sender queues poisoned".to_string()))?;
        let queue = queues
            .entry(addr.clone())
            .or_insert_with(|| spawn_writer(addr.clone(), self.inner.retry.clone()));
        if queue.send(bytes.clone()).is_err() {
            // The writer is gone; start a fresh one.
            let queue = spawn_writer(addr.clone(), self.inner.retry.clone());
            let _ = queue.send(bytes);
            queues.insert(addr, queue);
        }
        Ok(())
    }

    /// Drop the outbound queue to a peer. Frames not yet written are
    /// lost, which is what the caller wants for a dead peer.
    pub fn forget(&self, peer: &Endpoint) {
        if let Ok(mut queues) = self.inner.queues.lock() {
            queues.remove(&peer.addr());
        }
    }
}

fn spawn_writer(
    addr: String,
    retry: keel_server::RetryStrategy,
) -> mpsc::UnboundedSender<bytes::Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_connection(addr, retry, rx));
    tx
}

async fn write_connection(
    addr: String,
    retry: keel_server::RetryStrategy,
    mut frames: mpsc::UnboundedReceiver<bytes::Bytes>,
) {
    let mut connection: Option<FramedWrite<TcpStream, tokio_util::codec::LengthDelimitedCodec>> =
        None;
    while let Some(frame) = frames.recv().await {
        let mut delays = retry.iter();
        loop {
            if connection.is_none() {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        connection = Some(FramedWrite::new(stream, codec::new_codec()));
                    }
                    Err(e) => {
                        debug!("failed to connect to {addr}: {e}");
                    }
                }
            }
            if let Some(current) = connection.as_mut() {
                match current.send(frame.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        debug!("failed to write to {addr}: {e}");
                        connection = None;
                    }
                }
            }
            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    warn!("dropping undeliverable frame to {addr}");
                    break;
                }
            }
        }
    }
}
