//! Local shell transport.
//!
//! Runs the rendered command scripts through `sh -c` on this machine. Used
//! for hosts configured with `transport = "local"` and in tests.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::OnceLock,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use command_group::AsyncCommandGroup;
use futures::StreamExt;
use remote_logs_core::{
    Connector, ExecOutput, HostProfile, OutputStream, RemoteCommand, RemoteSession,
    TransportError,
};
use tokio::{io::AsyncReadExt, process::Command, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Grace period for a follower task to wind down on close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Returns the POSIX shell used to run command scripts.
///
/// Scripts are always POSIX `sh`, never the user's `$SHELL`.
#[must_use]
pub fn posix_shell() -> &'static Path {
    static SHELL: OnceLock<PathBuf> = OnceLock::new();
    SHELL.get_or_init(|| {
        let sh = Path::new("/bin/sh");
        if sh.is_file() {
            sh.to_path_buf()
        } else {
            PathBuf::from("sh")
        }
    })
}

fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new(posix_shell());
    cmd.arg("-c")
        .arg(script)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped());
    cmd
}

/// Connector for the local machine.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    command_timeout: Duration,
}

impl LocalConnector {
    /// Create a local connector.
    #[must_use]
    pub const fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        tracing::debug!(host = %host.key, "Opening local shell session");
        Ok(Box::new(LocalSession {
            host_key: host.key.clone(),
            command_timeout: self.command_timeout,
            open: true,
            followers: Vec::new(),
        }))
    }
}

struct Follower {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Session on the local machine.
pub struct LocalSession {
    host_key: String,
    command_timeout: Duration,
    open: bool,
    followers: Vec<Follower>,
}

#[async_trait]
impl RemoteSession for LocalSession {
    fn host_key(&self) -> &str {
        &self.host_key
    }

    async fn exec(&mut self, command: &RemoteCommand) -> Result<ExecOutput, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let script = command.to_shell_string()?;
        tracing::trace!(host = %self.host_key, %script, "exec");

        let child = shell_command(&script)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::Timeout(self.command_timeout))??;

        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stream(&mut self, command: &RemoteCommand) -> Result<OutputStream, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let script = command.to_shell_string()?;
        tracing::trace!(host = %self.host_key, %script, "stream");

        let mut child = shell_command(&script)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .group_spawn()?;
        let mut stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| TransportError::Channel("stdout not captured".to_string()))?;

        // capacity 1: the reader only runs ahead of the consumer by one chunk
        let (tx, rx) = mpsc::channel::<Result<Bytes, TransportError>>(1);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let host_key = self.host_key.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    () = tx.closed() => break,
                    read = stdout.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into())).await;
                            break;
                        }
                    },
                }
            }
            // Already-exited groups report ESRCH here
            if let Err(e) = child.start_kill() {
                tracing::trace!(host = %host_key, "kill after stream end: {e}");
            }
            let _ = child.wait().await;
            tracing::debug!(host = %host_key, "Local stream process reaped");
        });

        self.followers.push(Follower { cancel, handle });
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        for follower in self.followers.drain(..) {
            follower.cancel.cancel();
            if tokio::time::timeout(CLOSE_GRACE, follower.handle).await.is_err() {
                tracing::warn!(host = %self.host_key, "Local stream did not stop in time");
            }
        }
        tracing::debug!(host = %self.host_key, "Local shell session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    async fn session() -> Box<dyn RemoteSession> {
        LocalConnector::default()
            .connect(&HostProfile::local("local"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_exec_captures_output_and_status() {
        let mut s = session().await;
        let out = s
            .exec(&RemoteCommand::new("printf").arg("%s\\n").arg("a b"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "a b\n");

        let out = s.exec(&RemoteCommand::new("false")).await.unwrap();
        assert_eq!(out.status, 1);
    }

    #[tokio::test]
    async fn test_guard_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.log");
        let mut s = session().await;
        let out = s
            .exec(&RemoteCommand::new("true").require_readable(missing.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(out.status, remote_logs_core::command::EXIT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_commands() {
        let mut s = session().await;
        s.close().await;
        s.close().await;
        assert!(!s.is_open());
        assert!(matches!(
            s.exec(&RemoteCommand::new("true")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_stream_yields_output_until_exit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "one").unwrap();
        writeln!(file, "two").unwrap();
        let mut s = session().await;
        let mut stream = s
            .stream(&RemoteCommand::new("cat").arg(file.path().to_string_lossy()))
            .await
            .unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"one\ntwo\n");
        s.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_running_stream() {
        let mut s = session().await;
        let mut stream = s.stream(&RemoteCommand::new("sleep").arg("30")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), s.close())
            .await
            .expect("close should not hang");
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
