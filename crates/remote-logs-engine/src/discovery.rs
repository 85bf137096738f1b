//! Log file discovery under configured root directories.

use std::collections::HashSet;

use remote_logs_core::{LogFileDescriptor, RemoteCommand, RemoteSession, TransportError};

use crate::error::EngineError;

/// What to enumerate.
#[derive(Debug, Clone)]
pub struct DiscoveryQuery<'a> {
    pub roots: &'a [String],
    pub suffixes: &'a [String],
    pub max_per_root: usize,
    /// Literal substring the file name must contain. Empty means "match by
    /// suffix".
    pub filter: Option<&'a str>,
}

/// Escape `find -name` glob metacharacters so `s` matches literally.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn find_command(root: &str, query: &DiscoveryQuery<'_>) -> RemoteCommand {
    let cmd = RemoteCommand::new("find").args([root, "-type", "f"]);
    let cmd = match query.filter.filter(|f| !f.is_empty()) {
        Some(filter) => cmd.args(["-name".to_string(), format!("*{}*", escape_glob(filter))]),
        None => {
            let mut cmd = cmd.arg("(");
            for (i, suffix) in query.suffixes.iter().enumerate() {
                if i > 0 {
                    cmd = cmd.arg("-o");
                }
                cmd = cmd.args(["-name".to_string(), format!("*.{}", escape_glob(suffix))]);
            }
            cmd.arg(")")
        }
    };
    cmd.discard_stderr().limit_lines(query.max_per_root)
}

/// Enumerate log files under each root, in root order, without duplicates.
///
/// A root that cannot be listed contributes nothing. A broken session aborts
/// the whole call with `Connection`, so "no files" is never confused with
/// "could not ask".
///
/// # Errors
/// Returns `Connection` on transport failure.
pub async fn discover(
    session: &mut dyn RemoteSession,
    query: &DiscoveryQuery<'_>,
) -> Result<Vec<LogFileDescriptor>, EngineError> {
    let host = session.host_key().to_string();
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    if query.max_per_root == 0 || (query.filter.is_none_or(str::is_empty) && query.suffixes.is_empty()) {
        return Ok(files);
    }

    for root in query.roots {
        let command = find_command(root, query);
        let output = match session.exec(&command).await {
            Ok(output) => output,
            Err(TransportError::Timeout(after)) => {
                tracing::warn!(host = %host, root = %root, "Listing timed out after {after:?}, skipping root");
                continue;
            }
            Err(TransportError::Command(source)) => {
                return Err(EngineError::InvalidCommand { host, source });
            }
            Err(e) => return Err(EngineError::connection(&host, e)),
        };
        if !output.success() {
            tracing::debug!(host = %host, root = %root, status = output.status, "Root not listable, skipping");
            continue;
        }

        let stdout = output.stdout_lossy();
        let before = files.len();
        for path in stdout.lines().filter(|l| !l.is_empty()) {
            if seen.insert(path.to_string()) {
                files.push(LogFileDescriptor::from_path(path));
            }
        }
        tracing::trace!(host = %host, root = %root, found = files.len() - before, "Listed root");
    }

    tracing::debug!(host = %host, count = files.len(), "Discovery finished");
    Ok(files)
}
