//! Engine error taxonomy.

use remote_logs_core::{
    CommandBuildError, ExecOutput, FailureReason, TransportError,
    command::{EXIT_NOT_FOUND, EXIT_PERMISSION_DENIED},
};
use thiserror::Error;

/// Engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),
    #[error("Connection to {host} failed: {source}")]
    Connection {
        host: String,
        #[source]
        source: TransportError,
    },
    #[error("Search of {path} on {host} failed ({reason}): {message}")]
    Search {
        host: String,
        path: String,
        reason: FailureReason,
        message: String,
    },
    #[error("Tail of {path} on {host} failed ({reason}): {message}")]
    Tail {
        host: String,
        path: String,
        reason: FailureReason,
        message: String,
    },
    #[error("Stream of {path} on {host} failed ({reason}): {message}")]
    Stream {
        host: String,
        path: String,
        reason: FailureReason,
        message: String,
    },
    #[error("Invalid path {path}: {message}")]
    InvalidPath { path: String, message: String },
    #[error("Invalid command for {host}: {source}")]
    InvalidCommand {
        host: String,
        #[source]
        source: CommandBuildError,
    },
}

/// Which file operation produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Search,
    Tail,
    Stream,
}

impl EngineError {
    pub(crate) fn connection(host: &str, source: TransportError) -> Self {
        Self::Connection {
            host: host.to_string(),
            source,
        }
    }

    pub(crate) fn file(
        op: FileOp,
        host: &str,
        path: &str,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        let (host, path, message) = (host.to_string(), path.to_string(), message.into());
        match op {
            FileOp::Search => Self::Search {
                host,
                path,
                reason,
                message,
            },
            FileOp::Tail => Self::Tail {
                host,
                path,
                reason,
                message,
            },
            FileOp::Stream => Self::Stream {
                host,
                path,
                reason,
                message,
            },
        }
    }

    /// A transport failure in the middle of a file operation.
    pub(crate) fn lost(op: FileOp, host: &str, path: &str, source: &TransportError) -> Self {
        Self::file(
            op,
            host,
            path,
            FailureReason::ConnectionLost,
            source.to_string(),
        )
    }

    /// Map an `exec`/`stream` failure. Commands that could not be rendered
    /// are reported as such; everything else means the session broke.
    pub(crate) fn from_transport(op: FileOp, host: &str, path: &str, source: TransportError) -> Self {
        match source {
            TransportError::Command(source) => Self::InvalidCommand {
                host: host.to_string(),
                source,
            },
            other => Self::lost(op, host, path, &other),
        }
    }

    /// Host key involved, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::UnknownHost(host)
            | Self::Connection { host, .. }
            | Self::Search { host, .. }
            | Self::Tail { host, .. }
            | Self::Stream { host, .. }
            | Self::InvalidCommand { host, .. } => Some(host),
            Self::InvalidPath { .. } => None,
        }
    }

    /// File path involved, if any.
    #[must_use]
    pub fn file_path(&self) -> Option<&str> {
        match self {
            Self::Search { path, .. }
            | Self::Tail { path, .. }
            | Self::Stream { path, .. }
            | Self::InvalidPath { path, .. } => Some(path),
            Self::UnknownHost(_) | Self::Connection { .. } | Self::InvalidCommand { .. } => None,
        }
    }

    /// File failure reason, for file operation errors.
    #[must_use]
    pub const fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Search { reason, .. } | Self::Tail { reason, .. } | Self::Stream { reason, .. } => {
                Some(*reason)
            }
            _ => None,
        }
    }

    /// Machine-readable code for the presentation layer.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownHost(_) => "unknown_host",
            Self::Connection { .. } => "connection_failed",
            Self::InvalidPath { .. } => "invalid_path",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::Search { reason, .. } | Self::Tail { reason, .. } | Self::Stream { reason, .. } => {
                reason.as_str()
            }
        }
    }

    /// Whether the session that produced this error should be discarded.
    #[must_use]
    pub const fn is_session_fault(&self) -> bool {
        matches!(self, Self::Connection { .. })
            || matches!(self.reason(), Some(FailureReason::ConnectionLost))
    }
}

/// Map a guarded command's exit status to a failure, if it failed.
///
/// `ok_statuses` lists statuses that mean success besides 0 (grep uses 1 for
/// "no match").
pub(crate) fn classify_exit(output: &ExecOutput, ok_statuses: &[i32]) -> Option<(FailureReason, String)> {
    if output.success() || ok_statuses.contains(&output.status) {
        return None;
    }
    let stderr = output.stderr_lossy();
    let reason = match output.status {
        EXIT_NOT_FOUND => FailureReason::NotFound,
        EXIT_PERMISSION_DENIED => FailureReason::PermissionDenied,
        // the file can vanish or change mode between the guard and the command
        _ if stderr.contains("No such file or directory") => FailureReason::NotFound,
        _ if stderr.contains("Permission denied") => FailureReason::PermissionDenied,
        _ => FailureReason::CommandFailed,
    };
    let message = if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    };
    Some((reason, message))
}
