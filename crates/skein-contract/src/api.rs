use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;

/// Envelope returned by every public command.
///
/// Commands never surface an opaque fault across the boundary: callers see
/// either a success payload or a structured error with a stable code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: Some(code.into()),
        }
    }

    pub fn from_error(error: &OrchestrationError) -> Self {
        Self::err(error.error_code(), error.to_string())
    }

    pub fn from_result(result: Result<T, OrchestrationError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::from_error(&error),
        }
    }
}
