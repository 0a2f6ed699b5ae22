use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TASK_SCHEMA_VERSION: u32 = 1;

fn task_schema_version() -> u32 {
    TASK_SCHEMA_VERSION
}

/// Enumerates the automation workflows a task can run.
///
/// Feed collection is not a queued task kind; it runs through the
/// collection controller with its own start/stop surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Generate commentary scripts for queued work items.
    ScriptGeneration,
    /// Upload and publish a rendered video through the studio flow.
    VideoUpload,
}

impl TaskKind {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScriptGeneration => "script_generation",
            Self::VideoUpload => "video_upload",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "script_generation" => Some(Self::ScriptGeneration),
            "video_upload" => Some(Self::VideoUpload),
            _ => None,
        }
    }
}

/// Enumerates the lifecycle states of a task manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and waiting in its profile's FIFO.
    Queued,
    /// A workflow is executing steps for this task.
    Running,
    /// Held at a step boundary; the session lock is retained.
    Paused,
    /// Every step completed.
    Completed,
    /// A step failed or the task was invalid; the failing step and error
    /// are recorded on the manifest.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when the task cannot transition any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Enumerates list filters accepted by the task query APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatusFilter {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    /// Matches any terminal task.
    Terminal,
}

impl TaskStatusFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }

    pub fn matches(self, status: TaskStatus) -> bool {
        match self {
            Self::Queued => status == TaskStatus::Queued,
            Self::Running => status == TaskStatus::Running,
            Self::Paused => status == TaskStatus::Paused,
            Self::Completed => status == TaskStatus::Completed,
            Self::Failed => status == TaskStatus::Failed,
            Self::Cancelled => status == TaskStatus::Cancelled,
            Self::Terminal => status.is_terminal(),
        }
    }
}

/// Durable manifest persisted for each task.
///
/// Owned by the queue; mutated only by the workflow executing it. Terminal
/// manifests are retained for history until explicitly deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    #[serde(default = "task_schema_version")]
    pub schema_version: u32,
    pub task_id: String,
    pub kind: TaskKind,
    /// Opaque work payload (work-item ids, file paths) forwarded to steps.
    #[serde(default)]
    pub payload: Value,
    pub browser_profile_id: String,
    pub status: TaskStatus,
    /// Index of the next step to execute; advances only after a step
    /// succeeds, so resuming never repeats completed steps.
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
    #[serde(default)]
    pub started_unix_ms: Option<u64>,
    #[serde(default)]
    pub finished_unix_ms: Option<u64>,
}

impl TaskRecord {
    pub fn new(
        task_id: impl Into<String>,
        kind: TaskKind,
        payload: Value,
        browser_profile_id: impl Into<String>,
        now_unix_ms: u64,
    ) -> Self {
        Self {
            schema_version: TASK_SCHEMA_VERSION,
            task_id: task_id.into(),
            kind,
            payload,
            browser_profile_id: browser_profile_id.into(),
            status: TaskStatus::Queued,
            current_step: 0,
            total_steps: 0,
            retry_count: 0,
            error_code: None,
            error: None,
            created_unix_ms: now_unix_ms,
            updated_unix_ms: now_unix_ms,
            started_unix_ms: None,
            finished_unix_ms: None,
        }
    }
}
