//! Immutable engine configuration and host table.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{HostProfile, TransportKind};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Duplicate host key: {0}")]
    DuplicateHost(String),
    #[error("Host {0} has no credential configured")]
    MissingCredential(String),
    #[error("Host key must not be empty")]
    EmptyHostKey,
    #[error("Root directory must be absolute: {0}")]
    RelativeRoot(String),
}

/// Read-only mapping from host key to connection parameters.
///
/// Built once at startup and shared by reference; nothing mutates it.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Arc<HashMap<String, HostProfile>>,
    order: Arc<[String]>,
}

impl HostRegistry {
    /// Build a registry, rejecting duplicate keys and SSH hosts without credentials.
    ///
    /// # Errors
    /// Returns error if a profile is invalid.
    pub fn new<I>(profiles: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = HostProfile>,
    {
        let mut hosts = HashMap::new();
        let mut order = Vec::new();
        for profile in profiles {
            if profile.key.trim().is_empty() {
                return Err(ConfigError::EmptyHostKey);
            }
            if profile.transport == TransportKind::Ssh && profile.credential.is_empty() {
                return Err(ConfigError::MissingCredential(profile.key));
            }
            if hosts.contains_key(&profile.key) {
                return Err(ConfigError::DuplicateHost(profile.key));
            }
            order.push(profile.key.clone());
            hosts.insert(profile.key.clone(), profile);
        }
        Ok(Self {
            hosts: Arc::new(hosts),
            order: order.into(),
        })
    }

    /// Look up a host by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HostProfile> {
        self.hosts.get(key)
    }

    /// Whether `key` names a configured host.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.hosts.contains_key(key)
    }

    /// Host keys in configuration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Session pool settings. Pooling is disabled when `max_idle_per_host` is 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle sessions kept per host.
    pub max_idle_per_host: usize,
    /// Idle sessions older than this are closed instead of reused.
    #[serde(with = "secs")]
    pub idle_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 0,
            idle_ttl: Duration::from_secs(60),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directories enumerated by discovery.
    pub roots: Vec<String>,
    /// File suffixes treated as log files when no filter is given.
    pub suffixes: Vec<String>,
    /// Maximum discovered files per root.
    pub max_files_per_root: usize,
    /// `max_results` used when a caller gives none.
    pub default_search_results: usize,
    /// Upper bound on `max_results`.
    pub max_search_results: usize,
    /// `line_count` used when a caller gives none.
    pub default_tail_lines: usize,
    /// Upper bound on `line_count`.
    pub max_tail_lines: usize,
    /// Events buffered between a live stream and its consumer.
    pub stream_buffer: usize,
    /// A partial line longer than this is emitted without waiting for its terminator.
    pub max_line_bytes: usize,
    /// End a live stream when no line arrives for this long.
    #[serde(with = "opt_secs")]
    pub idle_timeout: Option<Duration>,
    /// Upper bound on one request/response command.
    #[serde(with = "secs")]
    pub command_timeout: Duration,
    /// Upper bound on establishing a session.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Reject file paths that are not under one of `roots`.
    pub restrict_to_roots: bool,
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roots: ["/var/log/", "/opt/logs/", "/home/user/logs/", "/tmp/logs/"]
                .into_iter()
                .map(String::from)
                .collect(),
            suffixes: ["log", "txt", "out"].into_iter().map(String::from).collect(),
            max_files_per_root: 50,
            default_search_results: 100,
            max_search_results: 10_000,
            default_tail_lines: 100,
            max_tail_lines: 10_000,
            stream_buffer: 64,
            max_line_bytes: 64 * 1024,
            idle_timeout: None,
            command_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            restrict_to_roots: false,
            pool: PoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check invariants the engine relies on.
    ///
    /// # Errors
    /// Returns error if a root is not absolute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = self.roots.iter().find(|r| !r.starts_with('/')) {
            return Err(ConfigError::RelativeRoot(root.clone()));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|o| o.map(Duration::from_secs))
    }
}
