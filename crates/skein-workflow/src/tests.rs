//! Tests for step sequencing, boundary pause/resume/cancel, lock
//! discipline, and failure classification.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::Semaphore;

use skein_contract::{
    BrowserDriver, ContentStore, FeedItem, OrchestrationError, ProfileStatus, TaskKind,
    TaskRecord, TaskStatus,
};
use skein_events::{BusEvent, ProgressBus};
use skein_locks::ProfileLockRegistry;
use skein_store::JsonStore;

use super::{step_catalog, WorkflowConfig, WorkflowControl, WorkflowMachine};

/// Driver fake that records invocations and optionally gates each step on a
/// semaphore permit so tests control exactly when steps complete.
struct ScriptedDriver {
    calls: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
    fail_step: Option<&'static str>,
}

impl ScriptedDriver {
    fn immediate() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: None,
            fail_step: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::immediate()
        }
    }

    fn failing_at(step: &'static str) -> Self {
        Self {
            fail_step: Some(step),
            ..Self::immediate()
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn step_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("step:").map(str::to_string))
            .collect()
    }

    fn release_steps(&self, count: usize) {
        if let Some(gate) = self.gate.as_ref() {
            gate.add_permits(count);
        }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn launch(&self, profile_id: &str) -> Result<(), OrchestrationError> {
        self.record(format!("launch:{profile_id}"));
        Ok(())
    }

    async fn check_status(&self, _profile_id: &str) -> Result<ProfileStatus, OrchestrationError> {
        Ok(ProfileStatus { active: true })
    }

    async fn run_step(
        &self,
        _profile_id: &str,
        step_name: &str,
        _args: &Value,
    ) -> Result<Value, OrchestrationError> {
        self.record(format!("step:{step_name}"));
        if let Some(gate) = self.gate.as_ref() {
            let _permit = gate.acquire().await.expect("step gate");
        }
        if self.fail_step == Some(step_name) {
            return Err(OrchestrationError::transient(step_name, "element not found"));
        }
        Ok(json!({}))
    }

    async fn fetch_current_item(&self, _profile_id: &str) -> Result<FeedItem, OrchestrationError> {
        Err(OrchestrationError::transient("fetch_current_item", "not a feed driver"))
    }

    async fn advance_feed(&self, _profile_id: &str) -> Result<(), OrchestrationError> {
        Err(OrchestrationError::transient("advance_feed", "not a feed driver"))
    }

    async fn close(&self, profile_id: &str) -> Result<(), OrchestrationError> {
        self.record(format!("close:{profile_id}"));
        Ok(())
    }
}

struct Harness {
    machine: WorkflowMachine,
    driver: Arc<ScriptedDriver>,
    store: Arc<JsonStore>,
    locks: ProfileLockRegistry,
    bus: ProgressBus,
    _temp: tempfile::TempDir,
}

fn harness(driver: ScriptedDriver, config: WorkflowConfig) -> Harness {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(JsonStore::open(temp.path()).expect("open store"));
    let driver = Arc::new(driver);
    let locks = ProfileLockRegistry::new();
    let bus = ProgressBus::new();
    let machine = WorkflowMachine::new(
        driver.clone(),
        store.clone(),
        bus.clone(),
        locks.clone(),
        config,
    );
    Harness {
        machine,
        driver,
        store,
        locks,
        bus,
        _temp: temp,
    }
}

fn upload_task(task_id: &str, profile_id: &str) -> TaskRecord {
    TaskRecord::new(task_id, TaskKind::VideoUpload, json!({}), profile_id, 1_000)
}

async fn wait_until<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn functional_completed_workflow_runs_every_step_in_order() {
    let harness = harness(ScriptedDriver::immediate(), WorkflowConfig::default());
    let task = upload_task("task-1", "profile-a");

    let finished = harness.machine.run(task, WorkflowControl::new()).await;

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.current_step, finished.total_steps);
    assert!(finished.error.is_none());
    assert!(!harness.locks.is_held("profile-a"));

    let expected = step_catalog(TaskKind::VideoUpload)
        .iter()
        .map(|step| step.name.to_string())
        .collect::<Vec<_>>();
    assert_eq!(harness.driver.step_calls(), expected);
    let calls = harness.driver.calls();
    assert_eq!(calls.first().map(String::as_str), Some("launch:profile-a"));
    assert_eq!(calls.last().map(String::as_str), Some("close:profile-a"));

    let persisted = harness.store.get_task("task-1").expect("get").expect("manifest");
    assert_eq!(persisted.status, TaskStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_pause_after_first_step_resumes_at_second_step() {
    let harness = harness(ScriptedDriver::gated(), WorkflowConfig::default());
    let control = WorkflowControl::new();
    let task = upload_task("task-1", "profile-a");

    let machine = harness.machine.clone();
    let run = tokio::spawn({
        let control = control.clone();
        async move { machine.run(task, control).await }
    });

    // Wait until the first step is in flight, pause, then let it finish.
    let driver = harness.driver.clone();
    wait_until(|| !driver.step_calls().is_empty(), "first step to start").await;
    control.pause();
    harness.driver.release_steps(1);

    let store = harness.store.clone();
    wait_until(
        || {
            store
                .get_task("task-1")
                .ok()
                .flatten()
                .map(|record| record.status == TaskStatus::Paused)
                .unwrap_or(false)
        },
        "task to pause at the step boundary",
    )
    .await;

    // Paused at the boundary: one step executed, lock still held.
    assert_eq!(harness.driver.step_calls().len(), 1);
    assert!(harness.locks.is_held("profile-a"));
    let paused = harness.store.get_task("task-1").expect("get").expect("manifest");
    assert_eq!(paused.current_step, 1);

    control.resume();
    harness.driver.release_steps(16);
    let finished = run.await.expect("join");

    assert_eq!(finished.status, TaskStatus::Completed);
    let expected = step_catalog(TaskKind::VideoUpload)
        .iter()
        .map(|step| step.name.to_string())
        .collect::<Vec<_>>();
    // Resuming continued from step 1: every step ran exactly once.
    assert_eq!(harness.driver.step_calls(), expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_cancel_takes_effect_at_the_next_step_boundary() {
    let harness = harness(ScriptedDriver::gated(), WorkflowConfig::default());
    let control = WorkflowControl::new();
    let task = upload_task("task-1", "profile-a");

    let machine = harness.machine.clone();
    let run = tokio::spawn({
        let control = control.clone();
        async move { machine.run(task, control).await }
    });

    let driver = harness.driver.clone();
    wait_until(|| !driver.step_calls().is_empty(), "first step to start").await;
    control.cancel();
    harness.driver.release_steps(1);

    let finished = run.await.expect("join");
    assert_eq!(finished.status, TaskStatus::Cancelled);
    // The in-flight step ran to completion; nothing after it started.
    assert_eq!(harness.driver.step_calls().len(), 1);
    assert!(!harness.locks.is_held("profile-a"));
}

#[tokio::test]
async fn functional_busy_profile_fails_without_touching_the_driver() {
    let harness = harness(ScriptedDriver::immediate(), WorkflowConfig::default());
    let holder = harness.locks.acquire("profile-a").expect("pre-acquire");

    let finished = harness
        .machine
        .run(upload_task("task-1", "profile-a"), WorkflowControl::new())
        .await;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_code.as_deref(), Some("resource_busy"));
    assert!(harness.driver.calls().is_empty());
    assert!(harness.locks.release(holder));
}

#[tokio::test]
async fn functional_step_failure_records_the_step_and_releases_the_lock() {
    let harness = harness(
        ScriptedDriver::failing_at("select_file"),
        WorkflowConfig::default(),
    );
    let (_sub, mut events) = harness.bus.subscribe();

    let finished = harness
        .machine
        .run(upload_task("task-1", "profile-a"), WorkflowControl::new())
        .await;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_code.as_deref(), Some("automation_failed"));
    assert!(finished.error.as_deref().unwrap_or_default().contains("select_file"));
    // Failed at step index 2: no auto-advance past the failure.
    assert_eq!(finished.current_step, 2);
    assert!(!harness.locks.is_held("profile-a"));
    assert_eq!(harness.driver.step_calls().len(), 3);

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let BusEvent::TaskStatus { status, .. } = event {
            saw_failed |= status == TaskStatus::Failed;
        }
    }
    assert!(saw_failed);
}

#[tokio::test]
async fn functional_step_deadline_is_a_step_failure_not_a_hang() {
    let config = WorkflowConfig {
        step_timeout: Duration::from_millis(50),
        ..WorkflowConfig::default()
    };
    // Gated driver with no permits: the first step never completes.
    let harness = harness(ScriptedDriver::gated(), config);

    let finished = harness
        .machine
        .run(upload_task("task-1", "profile-a"), WorkflowControl::new())
        .await;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_code.as_deref(), Some("automation_failed"));
    assert!(finished
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("exceeded timeout"));
    assert!(!harness.locks.is_held("profile-a"));
}

#[tokio::test]
async fn unit_empty_profile_is_fatal_configuration_before_any_lock() {
    let harness = harness(ScriptedDriver::immediate(), WorkflowConfig::default());

    let finished = harness
        .machine
        .run(upload_task("task-1", "  "), WorkflowControl::new())
        .await;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_code.as_deref(), Some("invalid_configuration"));
    assert!(harness.driver.calls().is_empty());
    assert!(harness.locks.held_profiles().is_empty());
}
