use async_trait::async_trait;
use serde_json::Value;

use crate::collect::FeedItem;
use crate::error::OrchestrationError;

/// Liveness snapshot for one browser profile's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileStatus {
    pub active: bool,
}

/// Contract implemented by the browser automation backend.
///
/// The orchestrator only invokes named steps and receives success or
/// failure; it never inspects page content. Implementations classify their
/// own failures: a missing element or navigation timeout is
/// `TransientAutomation`, a bad profile reference is `FatalConfiguration`.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens the named profile's browser process.
    async fn launch(&self, profile_id: &str) -> Result<(), OrchestrationError>;

    /// Reports whether the profile's browser process is currently running.
    async fn check_status(&self, profile_id: &str) -> Result<ProfileStatus, OrchestrationError>;

    /// Executes one atomic automation step against the profile.
    async fn run_step(
        &self,
        profile_id: &str,
        step_name: &str,
        args: &Value,
    ) -> Result<Value, OrchestrationError>;

    /// Returns the feed item currently presented to the profile.
    async fn fetch_current_item(&self, profile_id: &str) -> Result<FeedItem, OrchestrationError>;

    /// Advances the profile's feed to the next item.
    async fn advance_feed(&self, profile_id: &str) -> Result<(), OrchestrationError>;

    /// Closes the profile's browser process. Best-effort on terminal paths.
    async fn close(&self, profile_id: &str) -> Result<(), OrchestrationError>;
}
