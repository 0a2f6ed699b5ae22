//! Orchestrator composition root and public command surface.
//!
//! One `Orchestrator` is created at process start and torn down explicitly
//! — it owns the store, the progress bus, the lock registry, the task
//! queue, the collection controller, and one scheduler per schedule kind.
//! There are no ambient singletons. Every command returns an `ApiResponse`
//! envelope: a success payload or a structured error with a stable code,
//! never an opaque fault.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use skein_collect::{CollectionController, CollectionOptions, CollectionStatusReport};
use skein_contract::{
    ApiResponse, BrowserDriver, ExecutionLogEntry, OrchestrationError, RemoteContentService,
    ScheduleConfig, ScheduleConfigPatch, ScheduleKind, TaskKind, TaskRecord, TaskStatusFilter,
};
use skein_events::{BusEvent, ProgressBus, SubscriberId};
use skein_locks::ProfileLockRegistry;
use skein_queue::{QueueStatusReport, TaskQueue, TaskQueueConfig};
use skein_scheduler::{
    DailyScheduler, ExecuteNowOutcome, SchedulerOptions, SchedulerStatusReport,
};
use skein_store::JsonStore;
use skein_workflow::{WorkflowConfig, WorkflowMachine};


/// Construction-time tuning for the orchestrator's components.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub workflow: WorkflowConfig,
    pub queue: TaskQueueConfig,
    pub scheduler: SchedulerOptions,
    /// When false, scheduler tickers are not spawned; clock checks must be
    /// driven explicitly. Tests and embedders use this.
    pub disable_tickers: bool,
}

/// Request shape accepted by `collection_start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStartRequest {
    pub profile_id: String,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub max_count: u64,
    #[serde(default)]
    pub known_channels: Vec<String>,
    #[serde(default)]
    pub tracked_group: Vec<String>,
    #[serde(default)]
    pub max_item_age_days: Option<u32>,
    #[serde(default)]
    pub dwell_cap_ms: Option<u64>,
    #[serde(default)]
    pub advance_delay_ms: Option<u64>,
}

/// Owns every orchestration component for one process.
pub struct Orchestrator {
    bus: ProgressBus,
    queue: TaskQueue,
    collection: CollectionController,
    schedulers: HashMap<ScheduleKind, DailyScheduler>,
}

impl Orchestrator {
    /// Composes the engine over the given collaborators and store root.
    ///
    /// Reconciles tasks interrupted by a previous process before accepting
    /// new work, then arms the scheduler tickers.
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        remote: Arc<dyn RemoteContentService>,
        store_root: &Path,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let store = Arc::new(
            JsonStore::open(store_root)
                .with_context(|| format!("failed to open store at {}", store_root.display()))?,
        );
        let bus = ProgressBus::new();
        let locks = ProfileLockRegistry::new();

        let machine = WorkflowMachine::new(
            driver.clone(),
            store.clone(),
            bus.clone(),
            locks.clone(),
            options.workflow.clone(),
        );
        let queue = TaskQueue::new(store.clone(), machine, bus.clone(), options.queue.clone());
        let reconciled = queue
            .reconcile_interrupted_tasks()
            .context("failed to reconcile interrupted tasks")?;
        if reconciled > 0 {
            tracing::warn!(reconciled, "failed tasks left running by a previous process");
        }

        let collection =
            CollectionController::new(driver, store.clone(), bus.clone(), locks.clone());

        let mut schedulers = HashMap::new();
        for kind in [ScheduleKind::ScriptGeneration, ScheduleKind::VideoUpload] {
            let scheduler = DailyScheduler::new(
                kind,
                store.clone(),
                remote.clone(),
                queue.clone(),
                bus.clone(),
                options.scheduler.clone(),
            );
            if !options.disable_tickers {
                scheduler.start_ticker();
            }
            schedulers.insert(kind, scheduler);
        }

        Ok(Self {
            bus,
            queue,
            collection,
            schedulers,
        })
    }

    /// Explicit teardown: stops scheduler tickers and signals any active
    /// collection loop. In-flight fires and workflow steps finish
    /// cooperatively.
    pub fn shutdown(&self) {
        for scheduler in self.schedulers.values() {
            scheduler.shutdown();
        }
        self.collection.stop();
        tracing::info!("orchestrator shutdown requested");
    }

    /// Registers a progress-event subscriber. The handle must be returned
    /// through `unsubscribe_events` when done.
    pub fn subscribe_events(
        &self,
    ) -> (SubscriberId, tokio::sync::mpsc::UnboundedReceiver<BusEvent>) {
        self.bus.subscribe()
    }

    pub fn unsubscribe_events(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    // Task commands.

    pub fn task_create(
        &self,
        kind: &str,
        payload: Value,
        profile_id: &str,
    ) -> ApiResponse<TaskRecord> {
        let Some(kind) = TaskKind::parse(kind) else {
            return ApiResponse::from_error(&OrchestrationError::fatal_configuration(format!(
                "unknown task kind '{kind}'"
            )));
        };
        ApiResponse::from_result(self.queue.enqueue(kind, payload, profile_id))
    }

    pub fn task_list(&self, status_filter: Option<&str>) -> ApiResponse<Vec<TaskRecord>> {
        let filter = match status_filter {
            Some(raw) => match TaskStatusFilter::parse(raw) {
                Some(filter) => Some(filter),
                None => {
                    return ApiResponse::from_error(&OrchestrationError::fatal_configuration(
                        format!("unknown status filter '{raw}'"),
                    ));
                }
            },
            None => None,
        };
        ApiResponse::from_result(self.queue.list_tasks(filter))
    }

    pub fn task_cancel(&self, task_id: &str) -> ApiResponse<TaskRecord> {
        ApiResponse::from_result(self.queue.cancel(task_id))
    }

    pub fn task_pause(&self, task_id: &str) -> ApiResponse<()> {
        ApiResponse::from_result(self.queue.pause(task_id))
    }

    pub fn task_resume(&self, task_id: &str) -> ApiResponse<()> {
        ApiResponse::from_result(self.queue.resume(task_id))
    }

    pub fn queue_status(&self) -> ApiResponse<QueueStatusReport> {
        ApiResponse::ok(self.queue.queue_status())
    }

    // Scheduler commands, addressed by schedule kind.

    pub fn scheduler_get_config(&self, kind: &str) -> ApiResponse<ScheduleConfig> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.get_config()),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_update_config(
        &self,
        kind: &str,
        patch: ScheduleConfigPatch,
    ) -> ApiResponse<ScheduleConfig> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.update_config(patch)),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_enable(&self, kind: &str) -> ApiResponse<ScheduleConfig> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.enable()),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_disable(&self, kind: &str) -> ApiResponse<ScheduleConfig> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.disable()),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub async fn scheduler_execute_now(&self, kind: &str) -> ApiResponse<ExecuteNowOutcome> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.execute_now().await),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_logs(&self, kind: &str, limit: usize) -> ApiResponse<Vec<ExecutionLogEntry>> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.get_logs(limit)),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_clear_logs(&self, kind: &str) -> ApiResponse<()> {
        match self.scheduler(kind) {
            Ok(scheduler) => {
                scheduler.clear_logs();
                ApiResponse::ok(())
            }
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    pub fn scheduler_status(&self, kind: &str) -> ApiResponse<SchedulerStatusReport> {
        match self.scheduler(kind) {
            Ok(scheduler) => ApiResponse::ok(scheduler.get_status()),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    // Collection commands.

    pub async fn collection_start(&self, request: CollectionStartRequest) -> ApiResponse<String> {
        let mut options = CollectionOptions::for_profile(request.profile_id);
        options.duration_seconds = request.duration_seconds;
        options.max_count = request.max_count;
        options.known_channels = request.known_channels.into_iter().collect();
        options.tracked_group = request.tracked_group.into_iter().collect();
        if let Some(age) = request.max_item_age_days {
            options.max_item_age_days = age;
        }
        if let Some(dwell_cap) = request.dwell_cap_ms {
            options.dwell_cap_ms = dwell_cap;
        }
        if let Some(delay) = request.advance_delay_ms {
            options.advance_delay_ms = delay;
        }
        ApiResponse::from_result(self.collection.start(options).await)
    }

    pub fn collection_stop(&self) -> ApiResponse<bool> {
        ApiResponse::ok(self.collection.stop())
    }

    pub fn collection_status(&self) -> ApiResponse<CollectionStatusReport> {
        ApiResponse::ok(self.collection.status())
    }

    fn scheduler(&self, kind: &str) -> Result<&DailyScheduler, OrchestrationError> {
        let parsed = ScheduleKind::parse(kind)
            .ok_or_else(|| OrchestrationError::fatal_configuration(format!(
                "unknown schedule kind '{kind}'"
            )))?;
        self.schedulers
            .get(&parsed)
            .ok_or_else(|| OrchestrationError::not_found(format!("scheduler {kind}")))
    }
}
