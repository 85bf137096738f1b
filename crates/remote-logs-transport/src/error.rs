//! API errors and their mapping onto HTTP statuses.

use remote_logs_core::FailureReason;
use remote_logs_engine::EngineError;
use thiserror::Error;

use crate::protocol::ErrorBody;

/// Error returned by an API endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required parameter: {0}")]
    MissingInput(&'static str),
    #[error("Invalid request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::MissingInput(_) | Self::InvalidInput(_) => 400,
            Self::Engine(e) => match e {
                EngineError::UnknownHost(_)
                | EngineError::InvalidPath { .. }
                | EngineError::InvalidCommand { .. } => 400,
                EngineError::Connection { .. } => 502,
                EngineError::Search { reason, .. }
                | EngineError::Tail { reason, .. }
                | EngineError::Stream { reason, .. } => match reason {
                    FailureReason::NotFound => 404,
                    FailureReason::PermissionDenied => 403,
                    FailureReason::ConnectionLost => 502,
                    FailureReason::CommandFailed => 500,
                },
            },
        }
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "missing_input",
            Self::InvalidInput(_) => "invalid_input",
            Self::Engine(e) => e.reason_code(),
        }
    }

    /// JSON body for this error.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (host, file_path) = match self {
            Self::Engine(e) => (e.host().map(String::from), e.file_path().map(String::from)),
            _ => (None, None),
        };
        ErrorBody {
            error: self.to_string(),
            reason: self.reason_code().to_string(),
            host,
            file_path,
        }
    }
}

/// Take a required, non-blank parameter.
///
/// # Errors
/// Returns `MissingInput` naming the parameter.
pub fn required(value: Option<String>, name: &'static str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::MissingInput(name)),
    }
}
