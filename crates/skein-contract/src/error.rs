use thiserror::Error;

pub const ERROR_CODE_RESOURCE_BUSY: &str = "resource_busy";
pub const ERROR_CODE_AUTOMATION_FAILED: &str = "automation_failed";
pub const ERROR_CODE_INVALID_CONFIGURATION: &str = "invalid_configuration";
pub const ERROR_CODE_REMOTE_SERVICE_UNAVAILABLE: &str = "remote_service_unavailable";
pub const ERROR_CODE_NOT_FOUND: &str = "not_found";

/// Typed failure taxonomy shared by every Skein component.
///
/// An error raised inside one task or collection session never aborts work
/// on other browser profiles; callers convert these into terminal record
/// state plus log entries at the component boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// The named resource (a browser profile) is already held by another
    /// non-terminal unit of work. Never blocks, never retried internally.
    #[error("resource '{resource}' is busy")]
    ResourceBusy { resource: String },

    /// A named automation step failed for a recoverable reason (element not
    /// found, navigation timeout, step deadline exceeded). Retry, if any, is
    /// a caller-initiated re-enqueue.
    #[error("automation step '{step}' failed: {detail}")]
    TransientAutomation { step: String, detail: String },

    /// Missing or invalid configuration (unknown task kind, empty profile
    /// reference, bad credentials). Not retryable without a config change.
    #[error("invalid configuration: {detail}")]
    FatalConfiguration { detail: String },

    /// The remote content service or persistent store is unreachable.
    #[error("remote service unavailable: {detail}")]
    RemoteService { detail: String },

    /// A referenced record does not exist. Raised by the command surface.
    #[error("{what} not found")]
    NotFound { what: String },
}

impl OrchestrationError {
    /// Returns the stable snake_case code carried in task manifests, log
    /// entries, and command responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ResourceBusy { .. } => ERROR_CODE_RESOURCE_BUSY,
            Self::TransientAutomation { .. } => ERROR_CODE_AUTOMATION_FAILED,
            Self::FatalConfiguration { .. } => ERROR_CODE_INVALID_CONFIGURATION,
            Self::RemoteService { .. } => ERROR_CODE_REMOTE_SERVICE_UNAVAILABLE,
            Self::NotFound { .. } => ERROR_CODE_NOT_FOUND,
        }
    }

    pub fn resource_busy(resource: impl Into<String>) -> Self {
        Self::ResourceBusy {
            resource: resource.into(),
        }
    }

    pub fn transient(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TransientAutomation {
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub fn fatal_configuration(detail: impl Into<String>) -> Self {
        Self::FatalConfiguration {
            detail: detail.into(),
        }
    }

    pub fn remote_service(detail: impl Into<String>) -> Self {
        Self::RemoteService {
            detail: detail.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}
