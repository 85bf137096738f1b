//! HTTP surface for remote log access.
//!
//! Provides:
//! - Request/response bodies (`protocol`)
//! - Error to status mapping (`error`)
//! - Axum router with an SSE live tail (feature: http)

pub mod error;
pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

pub use error::ApiError;
pub use protocol::ErrorBody;

#[cfg(feature = "http")]
pub use http::{AppState, router};
