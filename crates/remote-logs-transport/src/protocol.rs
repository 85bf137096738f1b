//! Request and response bodies of the HTTP surface.

use remote_logs_core::{EndReason, FailureReason, LogFileDescriptor, SearchHit};
use serde::{Deserialize, Serialize};

/// `GET /servers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<String>,
}

/// `GET /get_log_files` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilesQuery {
    pub server: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilesResponse {
    pub server: String,
    pub log_files: Vec<LogFileDescriptor>,
}

/// `POST /search` form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchForm {
    pub server: Option<String>,
    pub file_path: Option<String>,
    pub search_text: Option<String>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub server: String,
    pub file_path: String,
    pub search_text: String,
    pub results: Vec<SearchHit>,
    pub count: usize,
}

/// `GET /tail` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TailQuery {
    pub server: Option<String>,
    pub file_path: Option<String>,
    pub lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailResponse {
    pub server: String,
    pub file_path: String,
    pub content: Vec<String>,
    pub count: usize,
}

/// `GET /live_tail` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveTailQuery {
    pub server: Option<String>,
    pub file_path: Option<String>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable code.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Data of an SSE `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorData {
    pub file_path: String,
    pub reason: FailureReason,
    pub message: String,
}

/// Data of an SSE `end` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndData {
    pub file_path: String,
    pub reason: EndReason,
}
