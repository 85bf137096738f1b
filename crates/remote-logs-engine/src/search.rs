//! Case-insensitive pattern search inside one file.

use remote_logs_core::{RemoteCommand, RemoteSession, SearchHit};

use crate::error::{EngineError, FileOp, classify_exit};

/// grep's "no lines selected" status.
const GREP_NO_MATCH: i32 = 1;

/// `-a` keeps a stray NUL byte from turning the file into "binary" output.
fn grep_command(file_path: &str, pattern: &str, max_results: usize) -> RemoteCommand {
    RemoteCommand::new("grep")
        .args(["-a", "-n", "-i", "-m"])
        .arg(max_results.to_string())
        .args(["-e", pattern, "--", file_path])
        .require_readable(file_path)
}

/// Parse one `N:content` line of `grep -n` output.
fn parse_hit(line: &str, file_path: &str) -> Option<SearchHit> {
    let (number, content) = line.split_once(':')?;
    let line_number = number.parse().ok()?;
    Some(SearchHit {
        line_number,
        content: content.to_string(),
        file_path: file_path.to_string(),
    })
}

/// Return up to `max_results` lines of `file_path` matching `pattern`
/// (basic regex, case-insensitive), in ascending line order.
///
/// The remote scan stops once `max_results` lines matched.
///
/// # Errors
/// Returns `Search` with the failure reason, or `InvalidCommand`.
pub async fn search(
    session: &mut dyn RemoteSession,
    file_path: &str,
    pattern: &str,
    max_results: usize,
) -> Result<Vec<SearchHit>, EngineError> {
    if max_results == 0 {
        return Ok(Vec::new());
    }
    let host = session.host_key().to_string();

    let command = grep_command(file_path, pattern, max_results);
    let output = session
        .exec(&command)
        .await
        .map_err(|e| EngineError::from_transport(FileOp::Search, &host, file_path, e))?;
    if let Some((reason, message)) = classify_exit(&output, &[GREP_NO_MATCH]) {
        tracing::debug!(host = %host, path = %file_path, %reason, "Search failed: {message}");
        return Err(EngineError::file(FileOp::Search, &host, file_path, reason, message));
    }

    let stdout = output.stdout_lossy();
    let hits: Vec<_> = stdout
        .lines()
        .filter_map(|line| parse_hit(line, file_path))
        .take(max_results)
        .collect();
    tracing::debug!(host = %host, path = %file_path, hits = hits.len(), "Search finished");
    Ok(hits)
}
