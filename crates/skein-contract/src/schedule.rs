use serde::{Deserialize, Serialize};

/// Enumerates the schedule types, one scheduler instance each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    ScriptGeneration,
    VideoUpload,
}

impl ScheduleKind {
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

/// Work-item window queried from the remote content service on each fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterWindow {
    #[serde(default)]
    pub days_back: u32,
    #[serde(default)]
    pub days_forward: u32,
}

impl Default for FilterWindow {
    fn default() -> Self {
        Self {
            days_back: 3,
            days_forward: 1,
        }
    }
}

/// Singleton configuration persisted per scheduler instance.
///
/// `last_execute_date` is mutated only by the scheduler itself, immediately
/// before a fire dispatches work, which keeps automatic firing idempotent
/// per calendar day even across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Local wall-clock fire time, `HH:MM`.
    pub execute_time: String,
    /// `YYYY-MM-DD` of the last automatic or manual fire.
    #[serde(default)]
    pub last_execute_date: Option<String>,
    #[serde(default)]
    pub filter_window: FilterWindow,
    /// Minimum metric count a remote work item must carry to qualify.
    #[serde(default)]
    pub min_threshold: u64,
    #[serde(default)]
    pub selected_browser_profile_ids: Vec<String>,
    /// Remote work-item status the fire queries for.
    #[serde(default = "default_status_filter")]
    pub status_filter: String,
}

fn default_status_filter() -> String {
    "pending".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            execute_time: "09:00".to_string(),
            last_execute_date: None,
            filter_window: FilterWindow::default(),
            min_threshold: 0,
            selected_browser_profile_ids: Vec::new(),
            status_filter: default_status_filter(),
        }
    }
}

/// Partial update merged into a `ScheduleConfig` by `update_config`.
///
/// Changing `execute_time` re-arms the schedule but never touches
/// `last_execute_date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfigPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub execute_time: Option<String>,
    #[serde(default)]
    pub filter_window: Option<FilterWindow>,
    #[serde(default)]
    pub min_threshold: Option<u64>,
    #[serde(default)]
    pub selected_browser_profile_ids: Option<Vec<String>>,
    #[serde(default)]
    pub status_filter: Option<String>,
}

impl ScheduleConfig {
    pub fn apply_patch(&mut self, patch: ScheduleConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(execute_time) = patch.execute_time {
            self.execute_time = execute_time;
        }
        if let Some(filter_window) = patch.filter_window {
            self.filter_window = filter_window;
        }
        if let Some(min_threshold) = patch.min_threshold {
            self.min_threshold = min_threshold;
        }
        if let Some(ids) = patch.selected_browser_profile_ids {
            self.selected_browser_profile_ids = ids;
        }
        if let Some(status_filter) = patch.status_filter {
            self.status_filter = status_filter;
        }
    }
}

/// Enumerates severity levels in a scheduler's execution log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One append-only entry in a scheduler's bounded execution log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionLogEntry {
    pub time_unix_ms: u64,
    pub level: LogLevel,
    pub message: String,
}
