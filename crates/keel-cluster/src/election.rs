use std::time::Duration;

use futures::StreamExt;
use keel_server::actor::{Actor, ActorHandle};
use keel_server::RetryStrategy;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::codec;
use crate::error::{ClusterError, ClusterResult};
use crate::net::Endpoint;

/// One observation from the election service. `leader` is [None] when no
/// leader is currently known; consumers pause client-visible work until a
/// new one arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderEvent {
    pub epoch: u64,
    pub leader: Option<Endpoint>,
}

/// Where leadership observations come from.
pub enum ElectionBackend {
    /// Single-master deployments: epoch 1 names the configured master,
    /// forever.
    Static { leader: Endpoint },
    /// An external election service reached at `host:port`, streaming
    /// length-delimited JSON [LeaderEvent] frames.
    Remote {
        locator: String,
        retry: RetryStrategy,
    },
    /// Events pushed by the test harness.
    Scripted { events: mpsc::Receiver<LeaderEvent> },
}

impl ElectionBackend {
    /// Build the backend from the `fault-tolerant` configuration value,
    /// falling back to a static single-master deployment.
    pub fn from_config(
        fault_tolerant: Option<&str>,
        master: Endpoint,
        retry: RetryStrategy,
    ) -> Self {
        match fault_tolerant {
            Some(locator) => Self::Remote {
                locator: locator.to_string(),
                retry,
            },
            None => Self::Static { leader: master },
        }
    }
}

/// Tracks the last observed leadership epoch. All consumers act only on
/// strictly increasing epochs; anything older is stale.
#[derive(Debug, Default)]
pub struct LeaderTracker {
    epoch: u64,
    leader: Option<Endpoint>,
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the event advances the epoch and was recorded.
    pub fn observe(&mut self, event: &LeaderEvent) -> bool {
        if event.epoch <= self.epoch {
            return false;
        }
        self.epoch = event.epoch;
        self.leader = event.leader.clone();
        true
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn leader(&self) -> Option<&Endpoint> {
        self.leader.as_ref()
    }

    /// Whether an envelope epoch is from a superseded master.
    /// Zero is the unqualified epoch and is never considered stale.
    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch > 0 && epoch < self.epoch
    }
}

/// Watch the election service and post leadership changes into the
/// consuming actor's loop, like any other message. Events with
/// non-increasing epochs are filtered here so consumers see a strictly
/// monotonic stream.
pub fn watch<T, F>(backend: ElectionBackend, handle: ActorHandle<T>, wrap: F) -> JoinHandle<()>
where
    T: Actor,
    F: Fn(LeaderEvent) -> T::Message + Send + 'static,
{
    tokio::spawn(async move {
        match backend {
            ElectionBackend::Static { leader } => {
                let event = LeaderEvent {
                    epoch: 1,
                    leader: Some(leader),
                };
                let _ = handle.send(wrap(event)).await;
            }
            ElectionBackend::Scripted { mut events } => {
                let mut last_epoch = 0;
                while let Some(event) = events.recv().await {
                    if event.epoch <= last_epoch {
                        continue;
                    }
                    last_epoch = event.epoch;
                    if handle.send(wrap(event)).await.is_err() {
                        return;
                    }
                }
            }
            ElectionBackend::Remote { locator, retry } => {
                let mut last_epoch = 0;
                loop {
                    let stream = retry
                        .run(|| async { connect(&locator).await })
                        .await;
                    let stream = match stream {
                        Ok(x) => x,
                        Err(e) => {
                            error!("failed to reach election service at {locator}: {e}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                    };
                    info!("watching election service at {locator}");
                    let mut frames = FramedRead::new(stream, codec::new_codec());
                    while let Some(frame) = frames.next().await {
                        let frame = match frame {
                            Ok(x) => x,
                            Err(e) => {
                                warn!("failed to read election event: {e}");
                                break;
                            }
                        };
                        let event: LeaderEvent = match codec::decode(&frame) {
                            Ok(x) => x,
                            Err(e) => {
                                warn!("failed to decode election event: {e}");
                                break;
                            }
                        };
                        if event.epoch <= last_epoch {
                            continue;
                        }
                        last_epoch = event.epoch;
                        if handle.send(wrap(event)).await.is_err() {
                            return;
                        }
                    }
                    warn!("lost connection to election service at {locator}");
                }
            }
        }
    })
}

async fn connect(locator: &str) -> ClusterResult<TcpStream> {
    TcpStream::connect(locator)
        .await
        .map_err(|e| ClusterError::Unreachable(format!("election service {locator}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ignores_stale_epochs() {
        let mut tracker = LeaderTracker::new();
        let leader = Endpoint::new("master", "127.0.0.1", 5050);
        assert!(tracker.observe(&LeaderEvent {
            epoch: 2,
            leader: Some(leader.clone()),
        }));
        assert!(!tracker.observe(&LeaderEvent {
            epoch: 2,
            leader: None,
        }));
        assert!(!tracker.observe(&LeaderEvent {
            epoch: 1,
            leader: None,
        }));
        assert_eq!(tracker.epoch(), 2);
        assert_eq!(tracker.leader(), Some(&leader));
    }

    #[test]
    fn test_tracker_staleness() {
        let mut tracker = LeaderTracker::new();
        tracker.observe(&LeaderEvent {
            epoch: 3,
            leader: None,
        });
        assert!(tracker.is_stale(2));
        assert!(!tracker.is_stale(3));
        assert!(!tracker.is_stale(0));
    }

    #[test]
    fn test_tracker_records_lost_leadership() {
        let mut tracker = LeaderTracker::new();
        tracker.observe(&LeaderEvent {
            epoch: 1,
            leader: Some(Endpoint::new("master", "127.0.0.1", 5050)),
        });
        assert!(tracker.observe(&LeaderEvent {
            epoch: 2,
            leader: None,
        }));
        assert_eq!(tracker.leader(), None);
    }
}
