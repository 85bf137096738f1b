//! Server settings file.
//!
//! ```toml
//! listen = "127.0.0.1:5000"
//! known_hosts = "/home/ops/.ssh/known_hosts"
//!
//! [engine]
//! roots = ["/var/log/", "/opt/logs/"]
//! idle_timeout = 600
//!
//! [[hosts]]
//! key = "200a"
//! address = "10.0.0.5"
//! username = "ops"
//! password_env = "SERVER200A_PASSWORD"
//! ```

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use remote_logs_core::{Credential, EngineConfig, HostProfile, HostRegistry, TransportKind};
use serde::Deserialize;

/// Default file name inside the platform config directory.
pub const DEFAULT_FILE_NAME: &str = "remote-logs.toml";

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

const fn default_port() -> u16 {
    22
}

/// One `[[hosts]]` entry. Secrets are referenced by environment variable name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub key: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub passphrase_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

impl HostEntry {
    fn into_profile(self, env: &impl Fn(&str) -> Option<String>) -> Result<HostProfile> {
        let lookup = |name: Option<String>, what: &str| -> Result<Option<String>> {
            name.map(|var| {
                env(&var).with_context(|| {
                    format!("host {}: {what} variable {var} is not set", self.key)
                })
            })
            .transpose()
        };
        let password = lookup(self.password_env.clone(), "password")?;
        let passphrase = lookup(self.passphrase_env.clone(), "passphrase")?;

        if self.transport == TransportKind::Ssh && self.address.trim().is_empty() {
            bail!("host {}: address is required for ssh hosts", self.key);
        }
        let key_file = self.key_file.map(expand_home);

        Ok(HostProfile {
            key: self.key,
            address: self.address,
            port: self.port,
            username: self.username,
            transport: self.transport,
            credential: Credential {
                key_file,
                passphrase,
                password,
            },
        })
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

/// Contents of the settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// OpenSSH `known_hosts` used to verify host keys.
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

impl Settings {
    /// Parse settings from TOML.
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or the engine settings are inconsistent.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut settings: Self = toml::from_str(text).context("Invalid settings")?;
        settings.engine.validate()?;
        settings.known_hosts = settings.known_hosts.map(expand_home);
        Ok(settings)
    }

    /// Read and parse a settings file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Build the host registry, resolving secrets through `env`.
    ///
    /// # Errors
    /// Returns error if a referenced variable is unset or a host is invalid.
    pub fn registry(&self, env: impl Fn(&str) -> Option<String>) -> Result<HostRegistry> {
        if self.hosts.is_empty() {
            bail!("No hosts configured");
        }
        let profiles = self
            .hosts
            .iter()
            .cloned()
            .map(|entry| entry.into_profile(&env))
            .collect::<Result<Vec<_>>>()?;
        Ok(HostRegistry::new(profiles)?)
    }
}

/// Settings path in the platform config directory.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("remote-logs").join(DEFAULT_FILE_NAME))
}
