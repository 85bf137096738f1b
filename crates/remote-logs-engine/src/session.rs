//! Session manager for opening and releasing remote sessions.

use std::{sync::Arc, time::Duration};

use remote_logs_core::{
    Connector, HostProfile, HostRegistry, PoolConfig, RemoteSession, SessionState,
    TransportError,
};
use uuid::Uuid;

use crate::{error::EngineError, pool::SessionPool};

/// Opens sessions against hosts from the registry.
///
/// Short-lived operations use [`SessionManager::acquire`], which may reuse a
/// pooled session; live streams use [`SessionManager::open`], which always
/// connects a dedicated one.
#[derive(Clone)]
pub struct SessionManager {
    registry: HostRegistry,
    connector: Arc<dyn Connector>,
    pool: Option<Arc<SessionPool>>,
    connect_timeout: Duration,
}

impl SessionManager {
    /// Create a session manager. Pooling is enabled when
    /// `pool.max_idle_per_host > 0`.
    #[must_use]
    pub fn new(
        registry: HostRegistry,
        connector: Arc<dyn Connector>,
        pool: &PoolConfig,
        connect_timeout: Duration,
    ) -> Self {
        let pool = (pool.max_idle_per_host > 0).then(|| Arc::new(SessionPool::new(pool.clone())));
        Self {
            registry,
            connector,
            pool,
            connect_timeout,
        }
    }

    /// Host table.
    #[must_use]
    pub const fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Session pool, when enabled.
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<SessionPool>> {
        self.pool.as_ref()
    }

    /// Resolve a host key.
    ///
    /// # Errors
    /// Returns `UnknownHost` if the key is not configured.
    pub fn profile(&self, host_key: &str) -> Result<&HostProfile, EngineError> {
        self.registry
            .get(host_key)
            .ok_or_else(|| EngineError::UnknownHost(host_key.to_string()))
    }

    /// Open a dedicated session. It is never returned to the pool.
    ///
    /// # Errors
    /// Returns `UnknownHost` or `Connection`.
    pub async fn open(&self, host_key: &str) -> Result<SessionHandle, EngineError> {
        let profile = self.profile(host_key)?;
        let id = Uuid::new_v4();
        tracing::debug!(host = %host_key, session_id = %id, state = ?SessionState::Opening, "Opening session");

        let session = match tokio::time::timeout(self.connect_timeout, self.connector.connect(profile)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!(host = %host_key, session_id = %id, "Connection failed: {e}");
                return Err(EngineError::connection(host_key, e));
            }
            Err(_) => {
                tracing::warn!(host = %host_key, session_id = %id, "Connection timed out");
                return Err(EngineError::connection(
                    host_key,
                    TransportError::Timeout(self.connect_timeout),
                ));
            }
        };

        tracing::debug!(host = %host_key, session_id = %id, state = ?SessionState::Active, "Session active");
        Ok(SessionHandle {
            id,
            host_key: host_key.to_string(),
            session: Some(session),
            pool: None,
        })
    }

    /// Get a session for a short-lived operation, reusing an idle pooled one
    /// when available.
    ///
    /// # Errors
    /// Returns `UnknownHost` or `Connection`.
    pub async fn acquire(&self, host_key: &str) -> Result<SessionHandle, EngineError> {
        let Some(ref pool) = self.pool else {
            return self.open(host_key).await;
        };
        self.profile(host_key)?;

        if let Some(session) = pool.take(host_key).await {
            let id = Uuid::new_v4();
            tracing::debug!(host = %host_key, session_id = %id, "Reusing pooled session");
            return Ok(SessionHandle {
                id,
                host_key: host_key.to_string(),
                session: Some(session),
                pool: Some(Arc::clone(pool)),
            });
        }

        let mut handle = self.open(host_key).await?;
        handle.pool = Some(Arc::clone(pool));
        Ok(handle)
    }
}

/// Exclusive ownership of one open session.
///
/// Close it with [`SessionHandle::close`] or [`SessionHandle::finish`]. A
/// handle dropped while still open closes its session on a background task.
pub struct SessionHandle {
    id: Uuid,
    host_key: String,
    session: Option<Box<dyn RemoteSession>>,
    pool: Option<Arc<SessionPool>>,
}

impl SessionHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn host_key(&self) -> &str {
        &self.host_key
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Active
        } else {
            SessionState::Closed
        }
    }

    /// The underlying session.
    ///
    /// # Errors
    /// Returns `Connection` if the handle was already closed.
    pub fn session(&mut self) -> Result<&mut dyn RemoteSession, EngineError> {
        match self.session {
            Some(ref mut session) => Ok(session.as_mut()),
            None => Err(EngineError::connection(&self.host_key, TransportError::Closed)),
        }
    }

    /// Close the session. Safe to call on an already-closed handle.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            tracing::debug!(host = %self.host_key, session_id = %self.id, state = ?SessionState::Closed, "Session closed");
        }
    }

    /// Release after an operation: healthy sessions go back to the pool (if
    /// pooled), everything else is closed.
    pub async fn finish(mut self, reusable: bool) {
        if let (true, Some(pool)) = (reusable, self.pool.take()) {
            if let Some(session) = self.session.take() {
                if session.is_open() {
                    tracing::trace!(host = %self.host_key, session_id = %self.id, "Returning session to pool");
                    pool.put(&self.host_key, session).await;
                    return;
                }
                self.session = Some(session);
            }
        }
        self.close().await;
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let (host, id) = (self.host_key.clone(), self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::debug!(host = %host, session_id = %id, "Session dropped while open, closing in background");
                rt.spawn(async move {
                    session.close().await;
                    tracing::debug!(host = %host, session_id = %id, state = ?SessionState::Closed, "Session closed");
                });
            }
            Err(_) => {
                tracing::warn!(host = %host, session_id = %id, "Session dropped outside a runtime; not closed");
            }
        }
    }
}
