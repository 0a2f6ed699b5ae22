//! Structured progress events and the fan-out bus that carries them.
//!
//! The bus delivers each published event at most once to the subscribers
//! registered at publish time; there is no persistence and no replay for
//! late subscribers. Subscribers hold an explicit id and unregister it when
//! done — closed receivers are also pruned on publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use skein_contract::{
    CollectionStats, ExecutionLogEntry, FeedItem, ScheduleKind, SkipReason, StopReason, TaskStatus,
};

#[cfg(test)]
mod tests;

/// Fire lifecycle reported on the scheduler status channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerFireStatus {
    Running,
    Completed,
    Error,
}

impl SchedulerFireStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Optional work-progress fraction attached to scheduler status events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FireProgress {
    pub current: u64,
    pub total: u64,
    pub percent: u8,
}

impl FireProgress {
    pub fn of(current: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((current.saturating_mul(100)) / total).min(100) as u8
        };
        Self {
            current,
            total,
            percent,
        }
    }
}

/// Enumerates what happened to the current feed item in a collection loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionEventKind {
    Collected,
    Skipped { reason: SkipReason },
    Watching { dwell_ms: u64 },
    Waiting { delay_ms: u64 },
    /// Terminal summary flushed when the loop stops; `stats` carries the
    /// final counters.
    Finished { reason: StopReason },
}

/// One collection progress event with a stats snapshot taken at emit time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: CollectionEventKind,
    #[serde(default)]
    pub item: Option<FeedItem>,
    pub stats: CollectionStats,
}

/// Enumerates every event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum BusEvent {
    TaskProgress {
        task_id: String,
        step: usize,
        step_name: String,
        percent: u8,
        message: String,
    },
    TaskStatus {
        task_id: String,
        status: TaskStatus,
        #[serde(default)]
        error: Option<String>,
    },
    SchedulerStatus {
        kind: ScheduleKind,
        status: SchedulerFireStatus,
        message: String,
        #[serde(default)]
        progress: Option<FireProgress>,
    },
    SchedulerLog {
        kind: ScheduleKind,
        entry: ExecutionLogEntry,
    },
    Collection(CollectionEvent),
}

/// Handle identifying one bus subscription; required for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, UnboundedSender<BusEvent>>>,
}

/// Fan-out publish/subscribe channel for orchestrator progress events.
#[derive(Debug, Clone, Default)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its id plus the receiving end.
    pub fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<BusEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        lock_unpoisoned(&self.inner.subscribers).insert(id, sender);
        (SubscriberId(id), receiver)
    }

    /// Removes a subscription. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        lock_unpoisoned(&self.inner.subscribers)
            .remove(&id.0)
            .is_some()
    }

    /// Delivers the event to every live subscriber, pruning closed ones.
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: BusEvent) -> usize {
        let mut subscribers = lock_unpoisoned(&self.inner.subscribers);
        let mut dropped = Vec::new();
        let mut delivered = 0usize;
        for (id, sender) in subscribers.iter() {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dropped.push(*id);
            }
        }
        for id in dropped {
            subscribers.remove(&id);
            tracing::debug!(subscriber_id = id, "pruned closed bus subscriber");
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock_unpoisoned(&self.inner.subscribers).len()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
