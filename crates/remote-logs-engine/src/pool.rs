//! Bounded per-host pool of idle sessions.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use remote_logs_core::{PoolConfig, RemoteSession};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct IdleSession {
    session: Box<dyn RemoteSession>,
    since: Instant,
}

/// Idle sessions keyed by host.
///
/// Sessions older than `idle_ttl` are closed instead of handed out.
pub struct SessionPool {
    config: PoolConfig,
    idle: Mutex<HashMap<String, VecDeque<IdleSession>>>,
}

impl SessionPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<IdleSession>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the most recently used live session for `host_key`.
    pub async fn take(&self, host_key: &str) -> Option<Box<dyn RemoteSession>> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.lock();
            let queue = idle.get_mut(host_key)?;
            let mut found = None;
            while let Some(entry) = queue.pop_back() {
                if entry.since.elapsed() < self.config.idle_ttl && entry.session.is_open() {
                    found = Some(entry.session);
                    break;
                }
                stale.push(entry.session);
            }
            found
        };
        close_all(stale).await;
        found
    }

    /// Return a session. The oldest idle session is closed when the host is at capacity.
    pub async fn put(&self, host_key: &str, session: Box<dyn RemoteSession>) {
        let evicted = {
            let mut idle = self.lock();
            let queue = idle.entry(host_key.to_string()).or_default();
            queue.push_back(IdleSession {
                session,
                since: Instant::now(),
            });
            let excess = queue.len().saturating_sub(self.config.max_idle_per_host);
            queue.drain(..excess).map(|e| e.session).collect::<Vec<_>>()
        };
        close_all(evicted).await;
    }

    /// Number of idle sessions held for `host_key`.
    pub fn idle_count(&self, host_key: &str) -> usize {
        self.lock().get(host_key).map_or(0, VecDeque::len)
    }

    /// Close sessions idle for longer than the TTL. Returns how many were closed.
    pub async fn evict_expired(&self) -> usize {
        let expired = {
            let mut idle = self.lock();
            let mut expired = Vec::new();
            for queue in idle.values_mut() {
                let (keep, stale): (VecDeque<_>, VecDeque<_>) = queue
                    .drain(..)
                    .partition(|e| e.since.elapsed() < self.config.idle_ttl);
                *queue = keep;
                expired.extend(stale.into_iter().map(|e| e.session));
            }
            idle.retain(|_, q| !q.is_empty());
            expired
        };
        let count = expired.len();
        close_all(expired).await;
        if count > 0 {
            tracing::debug!(count, "Evicted idle sessions");
        }
        count
    }

    /// Close every idle session.
    pub async fn drain(&self) {
        let all = {
            let mut idle = self.lock();
            idle.drain()
                .flat_map(|(_, q)| q.into_iter().map(|e| e.session))
                .collect::<Vec<_>>()
        };
        close_all(all).await;
    }

    /// Periodically evict expired sessions until `cancel` fires, then drain.
    pub fn spawn_evictor(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.evict_expired().await;
                    }
                }
            }
            self.drain().await;
        })
    }
}

async fn close_all(sessions: Vec<Box<dyn RemoteSession>>) {
    for mut session in sessions {
        session.close().await;
    }
}
