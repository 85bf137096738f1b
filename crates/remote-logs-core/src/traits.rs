//! Core traits for connecting to hosts and running commands.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{
    command::{CommandBuildError, RemoteCommand},
    model::HostProfile,
};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Session is closed")]
    Closed,
    #[error("Invalid command: {0}")]
    Command(#[from] CommandBuildError),
}

/// Captured result of a completed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit status; `-1` when the command was killed by a signal.
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout decoded lossily.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily, trimmed.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Raw output chunks of a long-running command.
///
/// The stream ends when the command exits. Dropping it terminates the
/// command.
pub type OutputStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// An opened, authenticated channel to one host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Key of the host this session is connected to.
    fn host_key(&self) -> &str;

    /// Run a command to completion.
    async fn exec(&mut self, command: &RemoteCommand) -> Result<ExecOutput, TransportError>;

    /// Start a command and stream its stdout.
    ///
    /// Chunks are read no faster than the stream is polled.
    async fn stream(&mut self, command: &RemoteCommand) -> Result<OutputStream, TransportError>;

    /// Whether the session can still run commands.
    fn is_open(&self) -> bool;

    /// Close the session. Idempotent and infallible.
    async fn close(&mut self);
}

/// Opens sessions to hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session to `host`.
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError>;
}
