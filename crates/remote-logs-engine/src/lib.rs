//! Remote log engine.
//!
//! This crate provides:
//! - `SessionManager` / `SessionHandle` - Session lifecycle and optional pooling
//! - `discovery`, `search`, `tail` - One-shot file operations
//! - `live` - Following a file as it grows
//! - `LogEngine` - The facade used by the HTTP layer

pub mod discovery;
pub mod error;
pub mod lines;
pub mod live;
pub mod path;
pub mod pool;
pub mod search;
pub mod session;
pub mod tail;

#[cfg(test)]
mod test_support;

use std::{sync::Arc, time::Duration};

use remote_logs_core::{Connector, EngineConfig, HostRegistry, LogFileDescriptor, SearchHit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::{EngineError, FileOp};
pub use live::{EventStream, FollowOptions, LiveTail, StreamState};
pub use pool::SessionPool;
pub use session::{SessionHandle, SessionManager};

use crate::discovery::DiscoveryQuery;

/// Entry point for all log operations against configured hosts.
#[derive(Clone)]
pub struct LogEngine {
    config: Arc<EngineConfig>,
    sessions: SessionManager,
}

impl LogEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(registry: HostRegistry, connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        let sessions = SessionManager::new(registry, connector, &config.pool, config.connect_timeout);
        Self {
            config: Arc::new(config),
            sessions,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configured host keys, in configuration order.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.sessions.registry().keys().map(String::from).collect()
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Release a session after a one-shot operation. It is kept for reuse
    /// only when the operation did not break it.
    async fn release<T>(handle: SessionHandle, result: &Result<T, EngineError>) {
        let reusable = result.as_ref().map_or_else(|e| !e.is_session_fault(), |_| true);
        handle.finish(reusable).await;
    }

    /// List log files on `host_key`. A non-empty `filter` selects files whose
    /// name contains it; otherwise files are selected by suffix.
    ///
    /// # Errors
    /// Returns `UnknownHost` or `Connection`.
    pub async fn list_files(
        &self,
        host_key: &str,
        filter: Option<&str>,
    ) -> Result<Vec<LogFileDescriptor>, EngineError> {
        let query = DiscoveryQuery {
            roots: &self.config.roots,
            suffixes: &self.config.suffixes,
            max_per_root: self.config.max_files_per_root,
            filter: filter.map(str::trim).filter(|f| !f.is_empty()),
        };
        let mut handle = self.sessions.acquire(host_key).await?;
        let result = match handle.session() {
            Ok(session) => discovery::discover(session, &query).await,
            Err(e) => Err(e),
        };
        Self::release(handle, &result).await;
        result
    }

    /// Search `file_path` for `pattern`. `max_results` defaults to and is
    /// clamped by the configuration.
    ///
    /// # Errors
    /// Returns `UnknownHost`, `Connection`, `InvalidPath` or `Search`.
    pub async fn search(
        &self,
        host_key: &str,
        file_path: &str,
        pattern: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        path::check_path(file_path, &self.config)?;
        self.sessions.profile(host_key)?;
        let max_results = max_results
            .unwrap_or(self.config.default_search_results)
            .min(self.config.max_search_results);
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let mut handle = self.sessions.acquire(host_key).await?;
        let result = match handle.session() {
            Ok(session) => search::search(session, file_path, pattern, max_results).await,
            Err(e) => Err(e),
        };
        Self::release(handle, &result).await;
        result
    }

    /// Last `line_count` lines of `file_path`, oldest first.
    ///
    /// # Errors
    /// Returns `UnknownHost`, `Connection`, `InvalidPath` or `Tail`.
    pub async fn tail(
        &self,
        host_key: &str,
        file_path: &str,
        line_count: Option<usize>,
    ) -> Result<Vec<String>, EngineError> {
        path::check_path(file_path, &self.config)?;
        self.sessions.profile(host_key)?;
        let line_count = line_count
            .unwrap_or(self.config.default_tail_lines)
            .min(self.config.max_tail_lines);
        if line_count == 0 {
            return Ok(Vec::new());
        }
        let mut handle = self.sessions.acquire(host_key).await?;
        let result = match handle.session() {
            Ok(session) => tail::tail(session, file_path, line_count).await,
            Err(e) => Err(e),
        };
        Self::release(handle, &result).await;
        result
    }

    /// Start following `file_path` on a dedicated session.
    ///
    /// # Errors
    /// Returns `UnknownHost`, `Connection`, `InvalidPath` or `Stream`.
    pub async fn live_tail(
        &self,
        host_key: &str,
        file_path: &str,
        cancel: CancellationToken,
    ) -> Result<LiveTail, EngineError> {
        path::check_path(file_path, &self.config)?;
        let options = FollowOptions {
            buffer: self.config.stream_buffer,
            max_line_bytes: self.config.max_line_bytes,
            idle_timeout: self.config.idle_timeout,
        };
        live::start(&self.sessions, host_key, file_path, &options, cancel).await
    }

    /// Periodically evict expired pooled sessions until `cancel` fires, then
    /// close the rest. Returns `None` when pooling is disabled.
    pub fn spawn_pool_evictor(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let pool = Arc::clone(self.sessions.pool()?);
        let every = (self.config.pool.idle_ttl / 2).max(Duration::from_secs(1));
        Some(pool.spawn_evictor(every, cancel))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::atomic::Ordering};

    use remote_logs_core::{FailureReason, PoolConfig, StreamEvent};

    use super::*;
    use crate::test_support::local_engine;

    #[tokio::test]
    async fn test_hosts_in_order() {
        let (engine, _) = local_engine(EngineConfig::default());
        assert_eq!(engine.hosts(), vec!["local"]);
    }

    #[tokio::test]
    async fn test_end_to_end_on_local_host() {
        let dir = tempfile::tempdir().unwrap();
        let root = format!("{}/", dir.path().display());
        fs::write(dir.path().join("app.log"), "INFO ok\nERR bad\n").unwrap();
        fs::write(dir.path().join("app.md"), "ERR\n").unwrap();

        let (engine, connector) = local_engine(EngineConfig {
            roots: vec![root],
            ..EngineConfig::default()
        });

        let files = engine.list_files("local", None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "app.log");
        let path = files[0].path.clone();

        let hits = engine.search("local", &path, "err", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line_number, 2);
        assert_eq!(hits[0].content, "ERR bad");

        let lines = engine.tail("local", &path, Some(1)).await.unwrap();
        assert_eq!(lines, vec!["ERR bad"]);

        // one dedicated session per operation, all closed
        assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_errors_before_connecting() {
        let (engine, connector) = local_engine(EngineConfig::default());

        let err = engine.tail("local", "relative.log", None).await.unwrap_err();
        assert_eq!(err.reason_code(), "invalid_path");

        let err = engine.search("nope", "/var/log/a.log", "x", None).await.unwrap_err();
        assert_eq!(err.reason_code(), "unknown_host");

        assert!(engine.search("local", "/var/log/a.log", "x", Some(0)).await.unwrap().is_empty());
        assert!(engine.tail("local", "/var/log/a.log", Some(0)).await.unwrap().is_empty());
        let err = engine.tail("nope", "/var/log/a.log", Some(0)).await.unwrap_err();
        assert_eq!(err.reason_code(), "unknown_host");
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tail_count_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let content: String = (0..20).map(|i| format!("{i}\n")).collect();
        fs::write(&path, content).unwrap();

        let (engine, _) = local_engine(EngineConfig {
            max_tail_lines: 5,
            ..EngineConfig::default()
        });
        let lines = engine
            .tail("local", &path.to_string_lossy(), Some(1000))
            .await
            .unwrap();
        assert_eq!(lines, vec!["15", "16", "17", "18", "19"]);
    }

    #[tokio::test]
    async fn test_failed_operation_still_releases_session() {
        let (engine, connector) = local_engine(EngineConfig::default());
        let err = engine.tail("local", "/nonexistent/a.log", None).await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NotFound));
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_pooled_engine_reuses_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "a\n").unwrap();
        let path = path.to_string_lossy().into_owned();

        let (engine, connector) = local_engine(EngineConfig {
            pool: PoolConfig {
                max_idle_per_host: 2,
                idle_ttl: Duration::from_secs(60),
            },
            ..EngineConfig::default()
        });
        for _ in 0..3 {
            engine.tail("local", &path, None).await.unwrap();
        }
        // a missing file does not poison the session
        engine.tail("local", "/nonexistent/a.log", None).await.unwrap_err();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);

        let cancel = CancellationToken::new();
        let evictor = engine.spawn_pool_evictor(cancel.clone()).unwrap();
        cancel.cancel();
        evictor.await.unwrap();
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_live_tail_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "").unwrap();
        let (engine, connector) = local_engine(EngineConfig {
            idle_timeout: Some(Duration::from_secs(1)),
            ..EngineConfig::default()
        });

        let mut live = engine
            .live_tail("local", &path.to_string_lossy(), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            live.next_event().await,
            Some(StreamEvent::End { .. })
        ));
        assert_eq!(live.finished().await, StreamState::Ended);
        assert_eq!(connector.open_sessions(), 0);
    }
}
