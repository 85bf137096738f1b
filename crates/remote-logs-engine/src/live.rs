//! Live following of a growing log file.
//!
//! A live tail owns one dedicated session for its whole life. The remote
//! `tail -f` output is pushed through a bounded channel: when the consumer
//! falls behind, reading from the remote side pauses until it catches up.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use remote_logs_core::{
    EndReason, FailureReason, OutputStream, RemoteCommand, StreamEvent, TransportError,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::{
    error::{EngineError, FileOp, classify_exit},
    lines::LineAssembler,
    session::{SessionHandle, SessionManager},
};

/// Lifecycle of a live tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Following,
    /// Stopped by its cancellation token or because the consumer went away.
    Cancelled,
    /// The session broke while following.
    Failed,
    /// The remote command exited or the idle timeout elapsed.
    Ended,
}

impl StreamState {
    /// Whether the stream has stopped and released its session.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Ended)
    }
}

/// Tuning for one live tail.
#[derive(Debug, Clone)]
pub struct FollowOptions {
    /// Events buffered before the remote read is paused.
    pub buffer: usize,
    pub max_line_bytes: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            buffer: 64,
            max_line_bytes: 64 * 1024,
            idle_timeout: None,
        }
    }
}

/// A running live tail.
///
/// Dropping it (or the stream from [`LiveTail::into_stream`]) stops the
/// follow task and closes the session.
pub struct LiveTail {
    host_key: String,
    file_path: String,
    events: mpsc::Receiver<StreamEvent>,
    state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LiveTail {
    #[must_use]
    pub fn host_key(&self) -> &str {
        &self.host_key
    }

    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Next event. `None` after the terminal event, or once the stream stopped.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the follow task has finished and released its session.
    pub async fn finished(&mut self) -> StreamState {
        match self.state.wait_for(|s| s.is_final()).await {
            Ok(state) => *state,
            Err(_) => StreamState::Failed,
        }
    }

    /// Cancel and wait for the session to be closed.
    pub async fn stop(self) -> StreamState {
        let Self {
            events,
            state,
            cancel,
            task,
            ..
        } = self;
        cancel.cancel();
        drop(events);
        if let Err(e) = task.await {
            tracing::warn!("Follow task failed: {e}");
        }
        *state.borrow()
    }

    /// Consume as a stream of events. Dropping the stream cancels the tail.
    #[must_use]
    pub fn into_stream(self) -> EventStream {
        EventStream {
            inner: ReceiverStream::new(self.events),
            _guard: self.cancel.drop_guard(),
        }
    }
}

/// Events of a live tail; cancels it when dropped.
pub struct EventStream {
    inner: ReceiverStream<StreamEvent>,
    _guard: DropGuard,
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Start following `file_path` on `host_key`.
///
/// The file is checked before following starts, so a missing or unreadable
/// file is reported here rather than as a stream event.
///
/// # Errors
/// Returns `UnknownHost`, `Connection`, `Stream` or `InvalidCommand`.
pub async fn start(
    sessions: &SessionManager,
    host_key: &str,
    file_path: &str,
    options: &FollowOptions,
    cancel: CancellationToken,
) -> Result<LiveTail, EngineError> {
    let (state_tx, state_rx) = watch::channel(StreamState::Idle);
    let span = tracing::info_span!("live_tail", host = %host_key, path = %file_path);

    state_tx.send_replace(StreamState::Connecting);
    let mut handle = match sessions.open(host_key).instrument(span.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            state_tx.send_replace(StreamState::Failed);
            return Err(e);
        }
    };

    let output = match begin(&mut handle, file_path).instrument(span.clone()).await {
        Ok(output) => output,
        Err(e) => {
            handle.close().await;
            state_tx.send_replace(StreamState::Failed);
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::channel(options.buffer.max(1));
    state_tx.send_replace(StreamState::Following);
    span.in_scope(|| tracing::info!(session_id = %handle.id(), "Following"));

    let follower = Follower {
        file_path: file_path.to_string(),
        tx,
        cancel: cancel.clone(),
        assembler: LineAssembler::new(options.max_line_bytes),
        idle_timeout: options.idle_timeout,
    };
    let task = tokio::spawn(
        async move {
            let outcome = follower.run(output).await;
            handle.close().await;
            tracing::info!(state = ?outcome, "Live tail stopped");
            state_tx.send_replace(outcome);
        }
        .instrument(span),
    );

    Ok(LiveTail {
        host_key: host_key.to_string(),
        file_path: file_path.to_string(),
        events: rx,
        state: state_rx,
        cancel,
        task,
    })
}

/// Probe the file, then start `tail -f` on it.
async fn begin(handle: &mut SessionHandle, file_path: &str) -> Result<OutputStream, EngineError> {
    let host = handle.host_key().to_string();
    let session = handle.session()?;

    let probe = RemoteCommand::new("true").require_readable(file_path);
    let output = session
        .exec(&probe)
        .await
        .map_err(|e| EngineError::from_transport(FileOp::Stream, &host, file_path, e))?;
    if let Some((reason, message)) = classify_exit(&output, &[]) {
        tracing::debug!(%reason, "Probe failed: {message}");
        return Err(EngineError::file(FileOp::Stream, &host, file_path, reason, message));
    }

    let follow = RemoteCommand::new("tail").args(["-n", "0", "-f", "--", file_path]);
    session
        .stream(&follow)
        .await
        .map_err(|e| EngineError::from_transport(FileOp::Stream, &host, file_path, e))
}

enum Step {
    Stop,
    Chunk(Bytes),
    Broken(TransportError),
    Exited,
    Idle,
}

struct Follower {
    file_path: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    assembler: LineAssembler,
    idle_timeout: Option<Duration>,
}

impl Follower {
    async fn run(mut self, mut output: OutputStream) -> StreamState {
        let mut deadline = self.idle_timeout.map(|d| Instant::now() + d);

        loop {
            let idle = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Stop,
                () = self.tx.closed() => Step::Stop,
                () = idle => Step::Idle,
                chunk = output.next() => match chunk {
                    Some(Ok(bytes)) => Step::Chunk(bytes),
                    Some(Err(e)) => Step::Broken(e),
                    None => Step::Exited,
                },
            };

            match step {
                Step::Stop => return StreamState::Cancelled,
                Step::Chunk(bytes) => {
                    let lines = self.assembler.push(&bytes);
                    if !lines.is_empty() {
                        deadline = self.idle_timeout.map(|d| Instant::now() + d);
                    }
                    for line in lines {
                        let event = StreamEvent::Line {
                            file_path: self.file_path.clone(),
                            line,
                        };
                        if !self.deliver(event).await {
                            return StreamState::Cancelled;
                        }
                    }
                }
                Step::Broken(e) => {
                    tracing::warn!("Follow stream broke: {e}");
                    let event = StreamEvent::Error {
                        file_path: self.file_path.clone(),
                        reason: FailureReason::ConnectionLost,
                        message: e.to_string(),
                    };
                    self.deliver(event).await;
                    return StreamState::Failed;
                }
                Step::Exited => {
                    if self.assembler.pending() > 0 {
                        tracing::debug!(bytes = self.assembler.pending(), "Dropping unterminated final line");
                    }
                    return self.end(EndReason::RemoteExited).await;
                }
                Step::Idle => return self.end(EndReason::IdleTimeout).await,
            }
        }
    }

    async fn end(&self, reason: EndReason) -> StreamState {
        let event = StreamEvent::End {
            file_path: self.file_path.clone(),
            reason,
        };
        if self.deliver(event).await {
            StreamState::Ended
        } else {
            StreamState::Cancelled
        }
    }

    /// Send an event, waiting for room. Returns `false` if the consumer is
    /// gone or the tail was cancelled meanwhile.
    async fn deliver(&self, event: StreamEvent) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write, sync::Arc};

    use remote_logs_core::PoolConfig;

    use super::*;
    use crate::test_support::{Chunk, CountingConnector, Script, local_registry};

    fn manager(connector: &CountingConnector) -> SessionManager {
        SessionManager::new(
            local_registry(),
            Arc::new(connector.clone()),
            &PoolConfig::default(),
            Duration::from_secs(5),
        )
    }

    fn line(path: &str, text: &str) -> StreamEvent {
        StreamEvent::Line {
            file_path: path.to_string(),
            line: text.to_string(),
        }
    }

    async fn scripted(script: Script, options: &FollowOptions) -> (LiveTail, CountingConnector) {
        let connector = CountingConnector::scripted(script);
        let live = start(
            &manager(&connector),
            "local",
            "/var/log/app.log",
            options,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        (live, connector)
    }

    async fn next(live: &mut LiveTail) -> Option<StreamEvent> {
        tokio::time::timeout(Duration::from_secs(10), live.next_event())
            .await
            .expect("no event in time")
    }

    #[tokio::test]
    async fn test_follows_appended_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old line\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let connector = CountingConnector::local();
        let mut live = start(
            &manager(&connector),
            "local",
            &path_str,
            &FollowOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(live.state(), StreamState::Following);

        // let tail open the file before appending
        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"one\ntw").unwrap();
        file.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        file.write_all(b"o\nthree\n").unwrap();
        file.flush().unwrap();

        assert_eq!(next(&mut live).await, Some(line(&path_str, "one")));
        assert_eq!(next(&mut live).await, Some(line(&path_str, "two")));
        assert_eq!(next(&mut live).await, Some(line(&path_str, "three")));

        assert_eq!(live.stop().await, StreamState::Cancelled);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let connector = CountingConnector::local();
        let cancel = CancellationToken::new();
        let mut live = start(
            &manager(&connector),
            "local",
            &path.to_string_lossy(),
            &FollowOptions::default(),
            cancel.clone(),
        )
        .await
        .unwrap();

        cancel.cancel();
        connector.wait_closed(1, Duration::from_secs(5)).await;
        assert_eq!(live.finished().await, StreamState::Cancelled);
        assert_eq!(live.next_event().await, None);
    }

    #[tokio::test]
    async fn test_dropped_consumer_is_noticed_while_idle() {
        let (live, connector) = scripted(
            Script {
                hang: true,
                ..Script::default()
            },
            &FollowOptions::default(),
        )
        .await;
        let mut state = live.state_watch();
        drop(live);

        connector.wait_closed(1, Duration::from_secs(5)).await;
        let final_state = *state.wait_for(|s| s.is_final()).await.unwrap();
        assert_eq!(final_state, StreamState::Cancelled);
    }

    #[tokio::test]
    async fn test_dropping_event_stream_cancels() {
        let (live, connector) = scripted(
            Script {
                chunks: vec![Chunk::Data("a\n")],
                hang: true,
                ..Script::default()
            },
            &FollowOptions::default(),
        )
        .await;
        let token = live.cancel_token();
        let mut stream = live.into_stream();
        assert_eq!(stream.next().await, Some(line("/var/log/app.log", "a")));
        drop(stream);

        assert!(token.is_cancelled());
        connector.wait_closed(1, Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_remote_exit_ends_stream() {
        let (mut live, connector) = scripted(
            Script {
                chunks: vec![Chunk::Data("a\nb"), Chunk::Data("c\nunterminated")],
                ..Script::default()
            },
            &FollowOptions::default(),
        )
        .await;
        let p = "/var/log/app.log";
        assert_eq!(next(&mut live).await, Some(line(p, "a")));
        assert_eq!(next(&mut live).await, Some(line(p, "bc")));
        assert_eq!(
            next(&mut live).await,
            Some(StreamEvent::End {
                file_path: p.into(),
                reason: EndReason::RemoteExited
            })
        );
        assert_eq!(next(&mut live).await, None);
        assert_eq!(live.finished().await, StreamState::Ended);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_io_error_is_terminal() {
        let (mut live, connector) = scripted(
            Script {
                chunks: vec![Chunk::Data("a\n"), Chunk::Fail("connection reset")],
                hang: true,
                ..Script::default()
            },
            &FollowOptions::default(),
        )
        .await;
        assert!(matches!(next(&mut live).await, Some(StreamEvent::Line { .. })));
        match next(&mut live).await {
            Some(StreamEvent::Error {
                reason, message, ..
            }) => {
                assert_eq!(reason, FailureReason::ConnectionLost);
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(next(&mut live).await, None);
        assert_eq!(live.finished().await, StreamState::Failed);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let options = FollowOptions {
            idle_timeout: Some(Duration::from_millis(100)),
            ..FollowOptions::default()
        };
        let (mut live, _connector) = scripted(
            Script {
                hang: true,
                ..Script::default()
            },
            &options,
        )
        .await;
        assert!(matches!(
            next(&mut live).await,
            Some(StreamEvent::End {
                reason: EndReason::IdleTimeout,
                ..
            })
        ));
        assert_eq!(live.finished().await, StreamState::Ended);
    }

    #[tokio::test]
    async fn test_slow_consumer_keeps_order() {
        let chunks = (0..50)
            .map(|i| Chunk::Data(Box::leak(format!("{i}\n").into_boxed_str())))
            .collect();
        let options = FollowOptions {
            buffer: 2,
            ..FollowOptions::default()
        };
        let (mut live, _connector) = scripted(
            Script {
                chunks,
                ..Script::default()
            },
            &options,
        )
        .await;

        let mut seen = Vec::new();
        while let Some(event) = next(&mut live).await {
            if let StreamEvent::Line { line, .. } = event {
                seen.push(line.parse::<u32>().unwrap());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_following() {
        let connector = CountingConnector::local();
        let err = start(
            &manager(&connector),
            "local",
            "/nonexistent/app.log",
            &FollowOptions::default(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            EngineError::Stream {
                reason: FailureReason::NotFound,
                ..
            }
        ));
        assert_eq!(connector.open_sessions(), 0);
    }
}
