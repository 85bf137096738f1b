//! Core abstractions for remote log access.
//!
//! This crate provides the fundamental building blocks:
//! - `HostProfile` / `HostRegistry` - Immutable host table
//! - `LogFileDescriptor`, `SearchHit`, `StreamEvent` - Result types
//! - `RemoteCommand` - Structured, quoted remote commands
//! - `Connector` and `RemoteSession` traits

pub mod command;
pub mod config;
pub mod model;
pub mod traits;

pub use command::{CommandBuildError, RemoteCommand};
pub use config::{ConfigError, EngineConfig, HostRegistry, PoolConfig};
pub use model::{
    Credential, EndReason, FailureReason, HostProfile, LogFileDescriptor, SearchHit, SessionState,
    StreamEvent, TransportKind,
};
pub use traits::{Connector, ExecOutput, OutputStream, RemoteSession, TransportError};
