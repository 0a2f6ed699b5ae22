use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;

/// One row of the remote work-item table (videos to script or upload).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteWorkItem {
    pub id: String,
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub published_unix_ms: Option<u64>,
    /// View-count style metric the scheduler thresholds on.
    #[serde(default)]
    pub metric_count: u64,
}

/// Status values written back to remote work items as tasks progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteItemStatus {
    InProgress,
    Completed,
    Failed,
}

impl RemoteItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Simple predicate filter for querying the remote work-item table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteQueryFilter {
    /// Inclusive publication window, unix milliseconds.
    pub published_after_unix_ms: Option<u64>,
    pub published_before_unix_ms: Option<u64>,
    /// Minimum `metric_count` to qualify.
    pub min_metric_count: u64,
    /// Work-item status to match; empty matches any.
    pub status: String,
}

/// Contract implemented by the remote content service.
#[async_trait]
pub trait RemoteContentService: Send + Sync {
    async fn query(
        &self,
        filter: &RemoteQueryFilter,
    ) -> Result<Vec<RemoteWorkItem>, OrchestrationError>;

    async fn update_status(
        &self,
        id: &str,
        status: RemoteItemStatus,
        error: Option<&str>,
    ) -> Result<(), OrchestrationError>;
}
