//! Validation of caller-supplied file paths.

use std::path::{Component, Path};

use remote_logs_core::EngineConfig;

use crate::error::EngineError;

/// Accept absolute paths without `..` components or NUL bytes. With
/// `restrict_to_roots`, the path must also lie under a configured root.
///
/// # Errors
/// Returns `InvalidPath` describing the first violated rule.
pub fn check_path(path: &str, config: &EngineConfig) -> Result<(), EngineError> {
    let invalid = |message: &str| EngineError::InvalidPath {
        path: path.to_string(),
        message: message.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.contains('\0') {
        return Err(invalid("path contains a NUL byte"));
    }
    let parsed = Path::new(path);
    if !parsed.is_absolute() {
        return Err(invalid("path must be absolute"));
    }
    if parsed.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("path must not contain '..'"));
    }
    if config.restrict_to_roots && !config.roots.iter().any(|root| parsed.starts_with(root)) {
        return Err(invalid("path is outside the configured log roots"));
    }
    Ok(())
}
