//! Last-N-lines retrieval.

use remote_logs_core::{RemoteCommand, RemoteSession};

use crate::error::{EngineError, FileOp, classify_exit};

/// Return the last `line_count` lines of `file_path`, oldest first.
///
/// # Errors
/// Returns `Tail` with the failure reason, or `InvalidCommand`.
pub async fn tail(
    session: &mut dyn RemoteSession,
    file_path: &str,
    line_count: usize,
) -> Result<Vec<String>, EngineError> {
    if line_count == 0 {
        return Ok(Vec::new());
    }
    let host = session.host_key().to_string();

    let command = RemoteCommand::new("tail")
        .arg("-n")
        .arg(line_count.to_string())
        .args(["--", file_path])
        .require_readable(file_path);
    let output = session
        .exec(&command)
        .await
        .map_err(|e| EngineError::from_transport(FileOp::Tail, &host, file_path, e))?;
    if let Some((reason, message)) = classify_exit(&output, &[]) {
        tracing::debug!(host = %host, path = %file_path, %reason, "Tail failed: {message}");
        return Err(EngineError::file(FileOp::Tail, &host, file_path, reason, message));
    }

    let lines: Vec<String> = output.stdout_lossy().lines().map(String::from).collect();
    tracing::debug!(host = %host, path = %file_path, lines = lines.len(), "Tail finished");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use remote_logs_core::{Connector, FailureReason, HostProfile};

    use super::*;
    use crate::test_support::CountingConnector;

    async fn run(content: &str, n: usize) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, content).unwrap();
        let mut session = CountingConnector::local()
            .connect(&HostProfile::local("local"))
            .await
            .unwrap();
        let lines = tail(session.as_mut(), &path.to_string_lossy(), n)
            .await
            .unwrap();
        session.close().await;
        lines
    }

    #[tokio::test]
    async fn test_last_lines_oldest_first() {
        assert_eq!(run("a\nb\nc\n", 2).await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_fewer_lines_than_requested() {
        assert_eq!(run("a\nb\n", 10).await, vec!["a", "b"]);
        assert!(run("", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_trailing_newline() {
        assert_eq!(run("a\nb", 1).await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let mut session = CountingConnector::local()
            .connect(&HostProfile::local("local"))
            .await
            .unwrap();
        let err = tail(session.as_mut(), "/nonexistent/app.log", 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Tail {
                reason: FailureReason::NotFound,
                ref host,
                ..
            } if host == "local"
        ));
        session.close().await;
    }
}
