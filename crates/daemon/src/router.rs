//! HTTP router for the WebShell daemon.
//!
//! This module wires the request handlers behind both listeners:
//!
//! | route | handler |
//! |---|---|
//! | `GET /ws`, `GET /` with upgrade | one terminal session per WebSocket |
//! | `POST /file` | write a file (paths are relative to `home_dir`) |
//! | `GET /file?filepath=` | read a file |
//! | `GET /directory?dirPath=` | recursive directory tree |
//! | `GET /health` | liveness and session count |
//! | anything else | static client assets |

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::files::{DirectoryBrowser, FileTransfer};
use crate::network::{serve_channel, SessionContext};
use crate::orchestrator::OrchestratorEvent;
use crate::session::{OutputClassifier, SessionOptions, SpawnOptions};

const WRITE_PARAMS_INVALID: &str = "Filepath and content are required.";
const WRITE_FAILED: &str = "Failed to write file.";
const WRITE_OK: &str = "File written successfully.";
const READ_PARAMS_INVALID: &str = "Filepath must be a single string value.";
const READ_FAILED: &str = "Failed to read file.";
const LIST_PARAMS_INVALID: &str = "Directory path must be a single string value.";
const LIST_FAILED: &str = "Failed to read directory.";

/// Errors returned by the HTTP handlers as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Missing or malformed parameters.
    #[error("{0}")]
    InvalidRequest(&'static str),

    /// The operation itself failed.
    #[error("{0}")]
    Internal(&'static str),
}

impl RouterError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    session: SessionContext,
    browser: DirectoryBrowser,
    transfer: FileTransfer,
    static_dir: PathBuf,
    active_sessions: Arc<AtomicUsize>,
    sessions: TaskTracker,
}

impl AppState {
    /// Builds handler state from validated configuration.
    pub fn from_config(
        config: &Config,
        shutdown: CancellationToken,
        events: broadcast::Sender<OrchestratorEvent>,
    ) -> Result<Self> {
        let home = config.home_dir();
        let classifier = OutputClassifier::new(&config.classifier.error_patterns)
            .context("Invalid classifier error_patterns")?;

        Ok(Self {
            session: SessionContext {
                spawn: SpawnOptions::from_config(&config.session, Some(home.clone())),
                classifier: Arc::new(classifier),
                options: SessionOptions::from_config(&config.session),
                shutdown,
                events,
            },
            browser: DirectoryBrowser::new(home.clone(), config.files.max_depth),
            transfer: FileTransfer::new(home),
            static_dir: config.server.static_dir.clone(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            sessions: TaskTracker::new(),
        })
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Tracks every running session task, for shutdown to wait on.
    pub fn session_tasks(&self) -> &TaskTracker {
        &self.sessions
    }
}

/// Builds the router served by every listener.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/ws", get(websocket))
        .route("/file", get(read_file).post(write_file))
        .route("/directory", get(list_directory))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(&state.static_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    accept_session(state, ws)
}

/// Upgrade requests at `/` get a session; anything else gets the client.
async fn root(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    match ws {
        Ok(ws) => accept_session(state, ws),
        Err(_) => match ServeDir::new(&state.static_dir).oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        },
    }
}

fn accept_session(state: AppState, ws: WebSocketUpgrade) -> Response {
    let tasks = state.sessions.clone();
    ws.on_upgrade(move |socket| tasks.track_future(run_session(state, socket)))
}

async fn run_session(state: AppState, socket: WebSocket) {
    let active = state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(active, "Channel accepted");

    let outcome = serve_channel(socket, state.session.clone()).await;

    let active = state.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    tracing::info!(
        session_id = %outcome.id,
        forced = outcome.forced,
        active,
        "Channel finished"
    );
}

#[derive(Debug, Deserialize)]
struct WriteFileRequest {
    filepath: Option<String>,
    content: Option<String>,
}

/// Writes `content` to `filepath`, replacing the file.
///
/// `filepath` is always taken relative to `home_dir`: a leading `/` is
/// dropped and `..` cannot leave it, so `/etc/hosts` names
/// `<home_dir>/etc/hosts`.
async fn write_file(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, RouterError> {
    let request: WriteFileRequest = serde_json::from_slice(&body)
        .map_err(|_| RouterError::InvalidRequest(WRITE_PARAMS_INVALID))?;

    let (filepath, content) = match (request.filepath, request.content) {
        (Some(filepath), Some(content)) if !filepath.is_empty() => (filepath, content),
        _ => return Err(RouterError::InvalidRequest(WRITE_PARAMS_INVALID)),
    };

    state
        .transfer
        .write(&filepath, &content)
        .await
        .map_err(|e| {
            tracing::warn!(filepath = %filepath, error = %e, "File write failed");
            RouterError::Internal(WRITE_FAILED)
        })?;

    Ok(Json(json!({ "message": WRITE_OK })))
}

/// Returns the whole of `filepath` as text.
///
/// Paths resolve under `home_dir` exactly as for writes.
async fn read_file(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, RouterError> {
    let filepath =
        single_param(&params, "filepath").ok_or(RouterError::InvalidRequest(READ_PARAMS_INVALID))?;

    let content = state.transfer.read(filepath).await.map_err(|e| {
        tracing::warn!(filepath = %filepath, error = %e, "File read failed");
        RouterError::Internal(READ_FAILED)
    })?;

    Ok(Json(json!({ "content": content })))
}

async fn list_directory(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, RouterError> {
    let dir_path =
        single_param(&params, "dirPath").ok_or(RouterError::InvalidRequest(LIST_PARAMS_INVALID))?;

    let contents = state.browser.list_async(dir_path).await.map_err(|e| {
        tracing::warn!(dir_path = %dir_path, error = %e, "Directory listing failed");
        RouterError::Internal(LIST_FAILED)
    })?;

    Ok(Json(json!({ "contents": contents })))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.active_sessions(),
    }))
}

/// Returns the value of `name` when it occurs exactly once.
fn single_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    let mut values = params.iter().filter(|(key, _)| key == name);
    match (values.next(), values.next()) {
        (Some((_, value)), None) => Some(value.as_str()),
        _ => None,
    }
}
