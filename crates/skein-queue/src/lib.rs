//! Task queue and dispatcher.
//!
//! Admits tasks, serializes them per browser profile (strict FIFO, one at a
//! time), runs tasks for distinct profiles concurrently, and reconciles
//! tasks interrupted by a restart. The workflow machine owns each task
//! while it runs; the queue only decides what runs next.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use skein_contract::{
    ContentStore, OrchestrationError, TaskKind, TaskRecord, TaskStatus, TaskStatusFilter,
};
use skein_core::current_unix_timestamp_ms;
use skein_events::{BusEvent, ProgressBus};
use skein_workflow::{WorkflowControl, WorkflowMachine};


/// Error code stamped on manifests found `running`/`paused` at startup.
/// Automation steps are not idempotent, so interrupted tasks fail rather
/// than silently resume across restarts.
pub const REASON_TASK_INTERRUPTED_BY_RESTART: &str = "task_interrupted_by_restart";

const TASK_ID_PREFIX: &str = "task";
const DEFAULT_RECENT_CAP: usize = 16;

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Queue tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueConfig {
    /// How many terminal tasks `queue_status` keeps for reporting.
    pub recent_cap: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            recent_cap: DEFAULT_RECENT_CAP,
        }
    }
}

/// Snapshot returned by `queue_status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStatusReport {
    pub queued: usize,
    pub running: usize,
    pub recent: Vec<TaskRecord>,
}

struct QueueInner {
    store: Arc<dyn ContentStore>,
    machine: WorkflowMachine,
    bus: ProgressBus,
    config: TaskQueueConfig,
    /// Per-profile FIFO of task ids awaiting dispatch.
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    /// Profiles with a live dispatcher worker.
    active_workers: Mutex<HashSet<String>>,
    /// Control handles of tasks currently owned by a workflow.
    controls: Mutex<HashMap<String, WorkflowControl>>,
    /// Queued tasks cancelled after being popped but before starting.
    cancelled_before_start: Mutex<HashSet<String>>,
    recent: Mutex<VecDeque<TaskRecord>>,
}

/// Per-profile FIFO dispatcher over the workflow machine.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn ContentStore>,
        machine: WorkflowMachine,
        bus: ProgressBus,
        config: TaskQueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                machine,
                bus,
                config,
                queues: Mutex::new(HashMap::new()),
                active_workers: Mutex::new(HashSet::new()),
                controls: Mutex::new(HashMap::new()),
                cancelled_before_start: Mutex::new(HashSet::new()),
                recent: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Marks manifests left `running` or `paused` by a previous process as
    /// `failed`. Returns how many manifests were reconciled.
    pub fn reconcile_interrupted_tasks(&self) -> Result<usize> {
        let now = current_unix_timestamp_ms();
        let mut reconciled = 0usize;
        for mut record in self.inner.store.list_tasks(None)? {
            if !matches!(record.status, TaskStatus::Running | TaskStatus::Paused) {
                continue;
            }
            record.status = TaskStatus::Failed;
            record.error_code = Some(REASON_TASK_INTERRUPTED_BY_RESTART.to_string());
            record.error = Some("task was interrupted by an orchestrator restart".to_string());
            record.updated_unix_ms = now;
            record.finished_unix_ms = Some(now);
            self.inner
                .store
                .put_task(&record)
                .with_context(|| format!("failed to reconcile task {}", record.task_id))?;
            tracing::warn!(task_id = %record.task_id, "reconciled interrupted task to failed");
            reconciled += 1;
        }
        Ok(reconciled)
    }

    /// Admits a task: persists the `queued` manifest, appends it to its
    /// profile's FIFO, and ensures a dispatcher worker for that profile.
    pub fn enqueue(
        &self,
        kind: TaskKind,
        payload: Value,
        profile_id: &str,
    ) -> Result<TaskRecord, OrchestrationError> {
        let profile_id = profile_id.trim();
        if profile_id.is_empty() {
            return Err(OrchestrationError::fatal_configuration(
                "browser profile id must be non-empty",
            ));
        }

        let task_id = next_task_id();
        let record = TaskRecord::new(
            task_id.clone(),
            kind,
            payload,
            profile_id,
            current_unix_timestamp_ms(),
        );
        self.inner
            .store
            .put_task(&record)
            .map_err(|error| OrchestrationError::remote_service(error.to_string()))?;

        {
            let mut queues = lock_unpoisoned(&self.inner.queues);
            queues
                .entry(profile_id.to_string())
                .or_default()
                .push_back(task_id.clone());
        }
        self.inner.bus.publish(BusEvent::TaskStatus {
            task_id: record.task_id.clone(),
            status: TaskStatus::Queued,
            error: None,
        });
        tracing::info!(task_id = %record.task_id, profile_id, kind = kind.as_str(), "task enqueued");

        self.schedule_worker(profile_id);
        Ok(record)
    }

    /// Cancels a task.
    ///
    /// A task still queued is finalized `cancelled` with zero side effects
    /// (it never acquired a lock or ran a step). A running task is
    /// cancelled cooperatively through its workflow control. Terminal tasks
    /// are returned unchanged.
    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord, OrchestrationError> {
        let record = self
            .load_task(task_id)?
            .ok_or_else(|| OrchestrationError::not_found(format!("task {task_id}")))?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        let removed_from_queue = {
            let mut queues = lock_unpoisoned(&self.inner.queues);
            match queues.get_mut(record.browser_profile_id.as_str()) {
                Some(queue) => {
                    let before = queue.len();
                    queue.retain(|id| id != task_id);
                    queue.len() != before
                }
                None => false,
            }
        };

        if removed_from_queue {
            return self.finalize_cancelled_before_start(record);
        }

        let control = lock_unpoisoned(&self.inner.controls)
            .get(task_id)
            .cloned();
        if let Some(control) = control {
            control.cancel();
            tracing::info!(task_id, "cancellation requested for running task");
            return Ok(record);
        }

        // Popped by a worker but not yet started: flag it so the worker
        // finalizes it without dispatching.
        lock_unpoisoned(&self.inner.cancelled_before_start).insert(task_id.to_string());
        Ok(record)
    }

    /// Requests a pause of a running task at its next step boundary.
    pub fn pause(&self, task_id: &str) -> Result<(), OrchestrationError> {
        self.with_control(task_id, |control| control.pause())
    }

    /// Resumes a paused task from its current step.
    pub fn resume(&self, task_id: &str) -> Result<(), OrchestrationError> {
        self.with_control(task_id, |control| control.resume())
    }

    pub fn list_tasks(
        &self,
        filter: Option<TaskStatusFilter>,
    ) -> Result<Vec<TaskRecord>, OrchestrationError> {
        self.inner
            .store
            .list_tasks(filter)
            .map_err(|error| OrchestrationError::remote_service(error.to_string()))
    }

    pub fn queue_status(&self) -> QueueStatusReport {
        let queued = lock_unpoisoned(&self.inner.queues)
            .values()
            .map(VecDeque::len)
            .sum();
        let running = lock_unpoisoned(&self.inner.controls).len();
        let recent = lock_unpoisoned(&self.inner.recent)
            .iter()
            .cloned()
            .collect();
        QueueStatusReport {
            queued,
            running,
            recent,
        }
    }

    fn with_control(
        &self,
        task_id: &str,
        apply: impl FnOnce(&WorkflowControl),
    ) -> Result<(), OrchestrationError> {
        let control = lock_unpoisoned(&self.inner.controls)
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found(format!("running task {task_id}")))?;
        apply(&control);
        Ok(())
    }

    fn load_task(&self, task_id: &str) -> Result<Option<TaskRecord>, OrchestrationError> {
        self.inner
            .store
            .get_task(task_id)
            .map_err(|error| OrchestrationError::remote_service(error.to_string()))
    }

    fn finalize_cancelled_before_start(
        &self,
        mut record: TaskRecord,
    ) -> Result<TaskRecord, OrchestrationError> {
        let now = current_unix_timestamp_ms();
        record.status = TaskStatus::Cancelled;
        record.updated_unix_ms = now;
        record.finished_unix_ms = Some(now);
        self.inner
            .store
            .put_task(&record)
            .map_err(|error| OrchestrationError::remote_service(error.to_string()))?;
        self.inner.bus.publish(BusEvent::TaskStatus {
            task_id: record.task_id.clone(),
            status: TaskStatus::Cancelled,
            error: None,
        });
        self.push_recent(record.clone());
        tracing::info!(task_id = %record.task_id, "queued task cancelled before start");
        Ok(record)
    }

    fn push_recent(&self, record: TaskRecord) {
        let mut recent = lock_unpoisoned(&self.inner.recent);
        recent.push_front(record);
        while recent.len() > self.inner.config.recent_cap.max(1) {
            recent.pop_back();
        }
    }

    /// Spawns the profile's dispatcher worker unless one is already live.
    fn schedule_worker(&self, profile_id: &str) {
        {
            let mut workers = lock_unpoisoned(&self.inner.active_workers);
            if !workers.insert(profile_id.to_string()) {
                return;
            }
        }
        let queue = self.clone();
        let profile_id = profile_id.to_string();
        tokio::spawn(async move {
            queue.worker_loop(profile_id).await;
        });
    }

    async fn worker_loop(self, profile_id: String) {
        loop {
            let next_task_id = {
                let mut queues = lock_unpoisoned(&self.inner.queues);
                queues
                    .get_mut(profile_id.as_str())
                    .and_then(VecDeque::pop_front)
            };
            let Some(task_id) = next_task_id else {
                break;
            };
            self.dispatch_task(task_id).await;
        }

        lock_unpoisoned(&self.inner.active_workers).remove(profile_id.as_str());
        // A task enqueued while the worker was shutting down would
        // otherwise strand; re-check and reschedule.
        let has_remaining = lock_unpoisoned(&self.inner.queues)
            .get(profile_id.as_str())
            .map(|queue| !queue.is_empty())
            .unwrap_or(false);
        if has_remaining {
            self.schedule_worker(profile_id.as_str());
        }
    }

    async fn dispatch_task(&self, task_id: String) {
        if lock_unpoisoned(&self.inner.cancelled_before_start).remove(task_id.as_str()) {
            if let Ok(Some(record)) = self.load_task(task_id.as_str()) {
                if !record.status.is_terminal() {
                    let _ = self.finalize_cancelled_before_start(record);
                }
            }
            return;
        }

        let record = match self.load_task(task_id.as_str()) {
            Ok(Some(record)) if record.status == TaskStatus::Queued => record,
            Ok(_) => return,
            Err(error) => {
                tracing::error!(task_id, %error, "failed to load task for dispatch");
                return;
            }
        };

        let control = WorkflowControl::new();
        lock_unpoisoned(&self.inner.controls).insert(task_id.clone(), control.clone());
        let finished = self.inner.machine.run(record, control).await;
        lock_unpoisoned(&self.inner.controls).remove(task_id.as_str());
        self.push_recent(finished);
    }
}

fn next_task_id() -> String {
    let now = current_unix_timestamp_ms();
    let suffix = TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{TASK_ID_PREFIX}-{now}-{suffix:04}")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
