//! Workflow state machine: sequences the named steps of one task against
//! one browser profile, with cooperative pause/resume/cancel at step
//! boundaries and a per-step deadline.
//!
//! The machine only sequences steps; every step is an opaque named unit
//! delegated to the browser driver. It performs no retry — failure
//! classification decides whether a caller re-enqueues.

mod control;
mod steps;

pub use control::WorkflowControl;
pub use steps::{step_catalog, WorkflowStep};

use std::sync::Arc;
use std::time::Duration;

use skein_contract::{
    BrowserDriver, ContentStore, OrchestrationError, TaskRecord, TaskStatus,
};
use skein_core::current_unix_timestamp_ms;
use skein_events::{BusEvent, ProgressBus};
use skein_locks::{ProfileLockRegistry, ProfileLockToken};

#[cfg(test)]
mod tests;

/// Tuning knobs for step execution and boundary polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Deadline for a single driver step; exceeding it is a step failure,
    /// not a hang.
    pub step_timeout: Duration,
    /// How often a paused workflow re-checks its control flags.
    pub pause_poll: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(120),
            pause_poll: Duration::from_millis(100),
        }
    }
}

/// Executes one task's step sequence end to end.
#[derive(Clone)]
pub struct WorkflowMachine {
    driver: Arc<dyn BrowserDriver>,
    store: Arc<dyn ContentStore>,
    bus: ProgressBus,
    locks: ProfileLockRegistry,
    config: WorkflowConfig,
}

impl WorkflowMachine {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        store: Arc<dyn ContentStore>,
        bus: ProgressBus,
        locks: ProfileLockRegistry,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            driver,
            store,
            bus,
            locks,
            config,
        }
    }

    /// Runs `task` to a terminal state and returns the final manifest.
    ///
    /// The manifest is persisted before each terminal status event, so the
    /// store stays authoritative over the bus.
    pub async fn run(&self, mut task: TaskRecord, control: WorkflowControl) -> TaskRecord {
        let steps = step_catalog(task.kind);
        task.total_steps = steps.len();

        if task.browser_profile_id.trim().is_empty() {
            let error =
                OrchestrationError::fatal_configuration("task has an empty browser profile id");
            return self.finalize(task, TaskStatus::Failed, Some(&error), None, false).await;
        }

        let token = match self.locks.acquire(task.browser_profile_id.as_str()) {
            Ok(token) => token,
            Err(error) => {
                return self.finalize(task, TaskStatus::Failed, Some(&error), None, false).await;
            }
        };

        task.status = TaskStatus::Running;
        task.started_unix_ms = Some(current_unix_timestamp_ms());
        task.updated_unix_ms = task.started_unix_ms.unwrap_or(task.updated_unix_ms);
        self.persist(&task);
        self.emit_status(&task);

        if let Err(error) = self.open_browser(task.browser_profile_id.as_str()).await {
            return self
                .finalize(task, TaskStatus::Failed, Some(&error), Some(token), true)
                .await;
        }

        while task.current_step < steps.len() {
            match self.wait_at_boundary(&mut task, &control).await {
                BoundaryOutcome::Proceed => {}
                BoundaryOutcome::Cancelled => {
                    return self
                        .finalize(task, TaskStatus::Cancelled, None, Some(token), true)
                        .await;
                }
            }

            let step = &steps[task.current_step];
            self.emit_progress(&task, step);
            match self.run_step(&task, step).await {
                Ok(()) => {
                    task.current_step += 1;
                    task.updated_unix_ms = current_unix_timestamp_ms();
                    self.persist(&task);
                }
                Err(error) => {
                    tracing::warn!(
                        task_id = %task.task_id,
                        step = step.name,
                        %error,
                        "workflow step failed"
                    );
                    return self
                        .finalize(task, TaskStatus::Failed, Some(&error), Some(token), true)
                        .await;
                }
            }
        }

        self.finalize(task, TaskStatus::Completed, None, Some(token), true)
            .await
    }

    async fn open_browser(&self, profile_id: &str) -> Result<(), OrchestrationError> {
        self.driver.launch(profile_id).await?;
        let status = self.driver.check_status(profile_id).await?;
        if !status.active {
            return Err(OrchestrationError::transient(
                "launch_browser",
                "browser process did not become active",
            ));
        }
        Ok(())
    }

    async fn run_step(
        &self,
        task: &TaskRecord,
        step: &WorkflowStep,
    ) -> Result<(), OrchestrationError> {
        let invocation = self.driver.run_step(
            task.browser_profile_id.as_str(),
            step.name,
            &task.payload,
        );
        match tokio::time::timeout(self.config.step_timeout, invocation).await {
            Ok(Ok(_result)) => Ok(()),
            Ok(Err(error)) => Err(error),
            Err(_elapsed) => Err(OrchestrationError::transient(
                step.name,
                format!(
                    "step exceeded timeout of {}ms",
                    self.config.step_timeout.as_millis()
                ),
            )),
        }
    }

    /// Honors pause and cancel flags at a step boundary. A paused task is
    /// persisted as `paused` with the session lock retained, then waits
    /// until resumed or cancelled.
    async fn wait_at_boundary(
        &self,
        task: &mut TaskRecord,
        control: &WorkflowControl,
    ) -> BoundaryOutcome {
        if control.is_cancel_requested() {
            return BoundaryOutcome::Cancelled;
        }
        if !control.is_paused() {
            return BoundaryOutcome::Proceed;
        }

        task.status = TaskStatus::Paused;
        task.updated_unix_ms = current_unix_timestamp_ms();
        self.persist(task);
        self.emit_status(task);
        tracing::info!(task_id = %task.task_id, step = task.current_step, "workflow paused");

        loop {
            tokio::time::sleep(self.config.pause_poll).await;
            if control.is_cancel_requested() {
                return BoundaryOutcome::Cancelled;
            }
            if !control.is_paused() {
                task.status = TaskStatus::Running;
                task.updated_unix_ms = current_unix_timestamp_ms();
                self.persist(task);
                self.emit_status(task);
                tracing::info!(task_id = %task.task_id, step = task.current_step, "workflow resumed");
                return BoundaryOutcome::Proceed;
            }
        }
    }

    async fn finalize(
        &self,
        mut task: TaskRecord,
        status: TaskStatus,
        error: Option<&OrchestrationError>,
        token: Option<ProfileLockToken>,
        close_browser: bool,
    ) -> TaskRecord {
        let now = current_unix_timestamp_ms();
        task.status = status;
        task.updated_unix_ms = now;
        task.finished_unix_ms = Some(now);
        if let Some(error) = error {
            task.error_code = Some(error.error_code().to_string());
            task.error = Some(error.to_string());
        }
        self.persist(&task);

        if close_browser {
            if let Err(error) = self.driver.close(task.browser_profile_id.as_str()).await {
                tracing::warn!(
                    task_id = %task.task_id,
                    profile_id = %task.browser_profile_id,
                    %error,
                    "failed to close browser after terminal transition"
                );
            }
        }
        if let Some(token) = token {
            self.locks.release(token);
        }

        self.emit_status(&task);
        task
    }

    fn persist(&self, task: &TaskRecord) {
        if let Err(error) = self.store.put_task(task) {
            tracing::error!(task_id = %task.task_id, %error, "failed to persist task manifest");
        }
    }

    fn emit_status(&self, task: &TaskRecord) {
        self.bus.publish(BusEvent::TaskStatus {
            task_id: task.task_id.clone(),
            status: task.status,
            error: task.error.clone(),
        });
    }

    fn emit_progress(&self, task: &TaskRecord, step: &WorkflowStep) {
        let percent = if task.total_steps == 0 {
            100
        } else {
            ((task.current_step * 100) / task.total_steps).min(100) as u8
        };
        self.bus.publish(BusEvent::TaskProgress {
            task_id: task.task_id.clone(),
            step: task.current_step,
            step_name: step.name.to_string(),
            percent,
            message: step.description.to_string(),
        });
    }
}

enum BoundaryOutcome {
    Proceed,
    Cancelled,
}
