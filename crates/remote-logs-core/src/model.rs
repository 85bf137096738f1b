//! Value types shared by the engine and its transports.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// How commands reach a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Remote shell over SSH.
    #[default]
    Ssh,
    /// The engine's own machine, through the local shell.
    Local,
}

/// Authentication material for one host.
///
/// Key-based authentication is attempted first when `key_file` is set.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    /// Private key file.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Passphrase for `key_file`.
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,
    /// Password for password authentication.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Credential {
    /// Whether any authentication method is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.key_file.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key_file", &self.key_file)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

const fn default_port() -> u16 {
    22
}

/// Connection parameters for one named host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProfile {
    /// Unique host key.
    pub key: String,
    /// Hostname or IP address.
    pub address: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user.
    #[serde(default)]
    pub username: String,
    /// Transport used to reach the host.
    #[serde(default)]
    pub transport: TransportKind,
    /// Authentication material.
    #[serde(default, flatten)]
    pub credential: Credential,
}

impl HostProfile {
    /// Profile for the engine's own machine.
    #[must_use]
    pub fn local(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            address: "localhost".to_string(),
            port: default_port(),
            username: String::new(),
            transport: TransportKind::Local,
            credential: Credential::default(),
        }
    }
}

/// Lifecycle of a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opening,
    Active,
    Closed,
}

/// A discovered log file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFileDescriptor {
    /// Absolute path on the host.
    pub path: String,
    /// Basename of `path`.
    pub name: String,
}

impl LogFileDescriptor {
    /// Build a descriptor from a path, deriving the basename.
    #[must_use]
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self { path, name }
    }
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based physical line number.
    pub line_number: u64,
    pub content: String,
    pub file_path: String,
}

/// Machine-readable failure reason for file operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    PermissionDenied,
    ConnectionLost,
    /// The remote command failed for any other reason (bad regex, directory, ...).
    CommandFailed,
}

impl FailureReason {
    /// Wire code of this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ConnectionLost => "connection_lost",
            Self::CommandFailed => "command_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a live stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The remote follow command exited (e.g. the file was removed).
    RemoteExited,
    /// No line arrived within the configured idle timeout.
    IdleTimeout,
}

/// Event produced by a live stream.
///
/// `Error` and `End` are terminal: nothing follows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A newly appended, complete line (terminator stripped).
    Line { file_path: String, line: String },
    /// Session-level failure.
    Error {
        file_path: String,
        reason: FailureReason,
        message: String,
    },
    /// The stream ended.
    End { file_path: String, reason: EndReason },
}

impl StreamEvent {
    /// Whether no further events follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Line { .. })
    }
}
