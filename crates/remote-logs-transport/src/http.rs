//! HTTP routes, including the server-sent events live tail.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{
        Form, Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use remote_logs_core::StreamEvent;
use remote_logs_engine::LogEngine;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::{ApiError, required},
    protocol::{
        LiveTailQuery, LogFilesQuery, LogFilesResponse, SearchForm, SearchResponse,
        ServersResponse, StreamEndData, StreamErrorData, TailQuery, TailResponse,
    },
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: LogEngine,
    /// Cancelled on shutdown; live tails are stopped through child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub const fn new(engine: LogEngine, shutdown: CancellationToken) -> Self {
        Self { engine, shutdown }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(reason = self.reason_code(), "{self}");
        } else {
            tracing::debug!(reason = self.reason_code(), "{self}");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/servers", get(servers))
        .route("/get_log_files", get(get_log_files))
        .route("/search", post(search))
        .route("/tail", get(tail))
        .route("/live_tail", get(live_tail))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn servers(State(state): State<AppState>) -> Json<ServersResponse> {
    Json(ServersResponse {
        servers: state.engine.hosts(),
    })
}

async fn get_log_files(
    State(state): State<AppState>,
    query: Result<Query<LogFilesQuery>, QueryRejection>,
) -> Result<Json<LogFilesResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let server = required(query.server, "server")?;

    let log_files = state
        .engine
        .list_files(&server, query.filter.as_deref())
        .await?;
    tracing::info!(host = %server, count = log_files.len(), "Listed log files");
    Ok(Json(LogFilesResponse { server, log_files }))
}

async fn search(
    State(state): State<AppState>,
    form: Result<Form<SearchForm>, FormRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let server = required(form.server, "server")?;
    let file_path = required(form.file_path, "file_path")?;
    let search_text = required(form.search_text, "search_text")?;

    let results = state
        .engine
        .search(&server, &file_path, &search_text, form.max_results)
        .await?;
    tracing::info!(host = %server, path = %file_path, hits = results.len(), "Search finished");
    Ok(Json(SearchResponse {
        count: results.len(),
        server,
        file_path,
        search_text,
        results,
    }))
}

async fn tail(
    State(state): State<AppState>,
    query: Result<Query<TailQuery>, QueryRejection>,
) -> Result<Json<TailResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let server = required(query.server, "server")?;
    let file_path = required(query.file_path, "file_path")?;

    let content = state.engine.tail(&server, &file_path, query.lines).await?;
    Ok(Json(TailResponse {
        count: content.len(),
        server,
        file_path,
        content,
    }))
}

async fn live_tail(
    State(state): State<AppState>,
    query: Result<Query<LiveTailQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let server = required(query.server, "server")?;
    let file_path = required(query.file_path, "file_path")?;

    let live = state
        .engine
        .live_tail(&server, &file_path, state.shutdown.child_token())
        .await?;
    tracing::info!(host = %server, path = %file_path, "Live tail started");

    // the event stream cancels the tail when the client disconnects
    let events = live.into_stream().map(|event| Ok(sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn json_event(name: &str, data: &impl serde::Serialize) -> Event {
    let event = Event::default().event(name);
    match serde_json::to_string(data) {
        Ok(json) => event.data(json),
        Err(e) => event.data(format!("{{\"message\":\"{e}\"}}")),
    }
}

/// Map a stream event onto its SSE frame.
fn sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Line { line, .. } => {
            // CR is not allowed inside an SSE field
            if line.contains('\r') {
                Event::default().data(line.replace('\r', ""))
            } else {
                Event::default().data(line)
            }
        }
        StreamEvent::Error {
            file_path,
            reason,
            message,
        } => json_event(
            "error",
            &StreamErrorData {
                file_path,
                reason,
                message,
            },
        ),
        StreamEvent::End { file_path, reason } => {
            json_event("end", &StreamEndData { file_path, reason })
        }
    }
}
