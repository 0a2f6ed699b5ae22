use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item observed in the recommendation feed, as reported by the driver.
///
/// The orchestrator never inspects page content; everything it needs for
/// classification arrives pre-extracted on this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    /// Normalized channel handle, lowercase, no leading `@`.
    #[serde(default)]
    pub channel_handle: String,
    #[serde(default)]
    pub is_ad: bool,
    #[serde(default)]
    pub is_followed: bool,
    #[serde(default)]
    pub published_unix_ms: Option<u64>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

/// Reasons the collection loop declines an item, in classification
/// precedence order: ad > followed > duplicate > too_old > not_in_group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Ad,
    Followed,
    Duplicate,
    TooOld,
    NotInGroup,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ad => "ad",
            Self::Followed => "followed",
            Self::Duplicate => "duplicate",
            Self::TooOld => "too_old",
            Self::NotInGroup => "not_in_group",
        }
    }
}

/// Running counters for one collection session. The skip-reason counters
/// always sum to `skipped_count`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    #[serde(default)]
    pub collected_count: u64,
    #[serde(default)]
    pub skipped_count: u64,
    #[serde(default)]
    pub ad_count: u64,
    #[serde(default)]
    pub followed_count: u64,
    #[serde(default)]
    pub duplicate_count: u64,
    #[serde(default)]
    pub too_old_count: u64,
    #[serde(default)]
    pub not_in_group_count: u64,
    #[serde(default)]
    pub watched_count: u64,
}

impl CollectionStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        self.skipped_count = self.skipped_count.saturating_add(1);
        let counter = match reason {
            SkipReason::Ad => &mut self.ad_count,
            SkipReason::Followed => &mut self.followed_count,
            SkipReason::Duplicate => &mut self.duplicate_count,
            SkipReason::TooOld => &mut self.too_old_count,
            SkipReason::NotInGroup => &mut self.not_in_group_count,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Enumerates why a collection loop terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop signal.
    Stopped,
    /// Elapsed time reached the configured duration bound.
    DurationReached,
    /// Collected-item count reached the configured maximum.
    MaxCountReached,
    /// Unrecoverable browser driver or store failure.
    DriverError,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::DurationReached => "duration_reached",
            Self::MaxCountReached => "max_count_reached",
            Self::DriverError => "driver_error",
        }
    }
}

/// Durable record persisted for each collected feed item. `item_id` is the
/// dedup identity within a run and across runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectedItem {
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_handle: String,
    pub collected_unix_ms: u64,
    #[serde(default)]
    pub payload: Value,
}
