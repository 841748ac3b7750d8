//! Run lifecycle notifications.

use std::fmt;

use async_trait::async_trait;
use fleetscan_model::{RunId, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: RunId,
        total: u32,
    },
    /// Emitted once per finished batch.
    Progress {
        run_id: RunId,
        completed: u32,
        failed: u32,
        total: u32,
    },
    Finished {
        run_id: RunId,
        status: RunStatus,
        completed: u32,
        failed: u32,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Started { run_id, .. }
            | RunEvent::Progress { run_id, .. }
            | RunEvent::Finished { run_id, .. } => *run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished { .. })
    }
}

#[async_trait]
pub trait RunEventPublisher: Send + Sync {
    async fn publish(&self, event: RunEvent) -> Result<()>;
}

/// In-process fan-out of run events. Publishing with no subscribers is a
/// no-op.
pub struct RunEventBus {
    sender: broadcast::Sender<RunEvent>,
    capacity: usize,
}

impl fmt::Debug for RunEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for RunEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RunEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Every event for every run.
    pub fn subscribe_all(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Only the events of `run_id`.
    pub fn subscribe(&self, run_id: RunId) -> RunSubscription {
        RunSubscription {
            run_id,
            receiver: self.sender.subscribe(),
            finished: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl RunEventPublisher for RunEventBus {
    async fn publish(&self, event: RunEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Receiver filtered to a single run. Ends after the run's `Finished` event.
#[derive(Debug)]
pub struct RunSubscription {
    run_id: RunId,
    receiver: broadcast::Receiver<RunEvent>,
    finished: bool,
}

impl RunSubscription {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next event for this run, or `None` once the run finished or the bus
    /// went away. Lagged receivers skip ahead instead of failing.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.run_id() == self.run_id => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "scan::events",
                        run = %self.run_id,
                        skipped,
                        "run subscription lagged; events dropped"
                    );
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
