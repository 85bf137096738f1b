//! Shell transports for remote log access.
//!
//! Provides:
//! - `SshConnector` - Remote shell sessions over SSH (libssh2)
//! - `LocalConnector` - The same command surface on the local machine
//! - `ShellConnector` - Dispatches on the host's transport kind

pub mod local;
pub mod ssh;

use async_trait::async_trait;
use remote_logs_core::{Connector, HostProfile, RemoteSession, TransportError, TransportKind};

pub use local::LocalConnector;
pub use ssh::{SshConnector, SshOptions};

/// Connector that picks SSH or the local shell per host.
#[derive(Debug, Clone)]
pub struct ShellConnector {
    ssh: SshConnector,
    local: LocalConnector,
}

impl ShellConnector {
    /// Create a dispatching connector.
    #[must_use]
    pub const fn new(ssh: SshConnector, local: LocalConnector) -> Self {
        Self { ssh, local }
    }
}

#[async_trait]
impl Connector for ShellConnector {
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        match host.transport {
            TransportKind::Ssh => self.ssh.connect(host).await,
            TransportKind::Local => self.local.connect(host).await,
        }
    }
}
