//! HTTP API for browser chat UIs.
//!
//! Exposes the session over a small JSON API. Answers are streamed as
//! server-sent events so the UI can render fragments as they arrive.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents` | Upload documents (base64 payloads), rebuild the index |
//! | `POST` | `/chat` | Ask a question; SSE stream of `delta` events, then `done` |
//! | `GET`  | `/history` | Current conversation transcript |
//! | `POST` | `/reset` | Clear history and index |
//! | `GET`  | `/session` | Read session settings |
//! | `PUT`  | `/session` | Update role instruction, temperature, backend, model |
//!
//! # Error Contract
//!
//! Error responses use a JSON body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `backend_unavailable` (502),
//! `internal` (500). A mid-stream completion failure arrives as an SSE
//! `error` event instead, since the response status is already committed.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{self, Config};
use crate::embedding::EmbedError;
use crate::extract::{content_type_for_path, MIME_PDF};
use crate::ingest::{DocumentInput, IngestError};
use crate::session::{Session, SessionSettings};

/// Shared application state. The session mutex is held for the whole of a
/// chat turn or index rebuild, which is what enforces the single-in-flight
/// rule.
#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<Session>>,
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let session = Session::new(config.clone())
        .map_err(|e| anyhow::anyhow!("failed to create session: {}", e))?;

    let state = AppState {
        session: Arc::new(Mutex::new(session)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_documents))
        .route("/chat", post(handle_chat))
        .route("/history", get(handle_history))
        .route("/reset", post(handle_reset))
        .route("/session", get(handle_get_session).put(handle_put_session))
        .layer(cors)
        .with_state(state);

    println!("doc-chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn backend_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "backend_unavailable".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn classify_ingest_error(err: IngestError) -> AppError {
    match err {
        IngestError::Embed(EmbedError::BackendUnavailable(m)) => backend_unavailable(m),
        IngestError::Embed(e @ EmbedError::Disabled)
        | IngestError::Embed(e @ EmbedError::Config(_))
        | IngestError::Embed(e @ EmbedError::UnknownProvider(_))
        | IngestError::Embed(e @ EmbedError::Rejected(_)) => bad_request(e.to_string()),
        IngestError::Embed(e) => internal(e.to_string()),
        IngestError::Index(e) => internal(e.to_string()),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

#[derive(Deserialize)]
struct UploadFile {
    name: String,
    data_base64: String,
    /// Optional explicit content type; guessed from the filename otherwise.
    content_type: Option<String>,
}

async fn handle_documents(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut inputs = Vec::with_capacity(request.files.len());

    for file in &request.files {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&file.data_base64)
            .map_err(|e| bad_request(format!("invalid base64 for {}: {}", file.name, e)))?;

        let content_type = file
            .content_type
            .clone()
            .or_else(|| content_type_for_path(Path::new(&file.name)).map(|s| s.to_string()))
            .unwrap_or_else(|| MIME_PDF.to_string());

        inputs.push(DocumentInput {
            name: file.name.clone(),
            content_type,
            bytes,
        });
    }

    let mut session = state.session.lock().await;
    let report = session
        .rebuild_index(&inputs)
        .await
        .map_err(classify_ingest_error)?;

    Ok(Json(serde_json::json!({ "result": report })))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    // The turn runs in its own task so the SSE body can start flowing
    // immediately. The session stays locked until the turn finishes.
    tokio::spawn(async move {
        let mut session = state.session.lock().await;
        let mut on_delta = |delta: &str| match sse_event("delta", delta) {
            Some(event) => tx.send(event).is_ok(),
            None => true,
        };
        let terminal = match session.chat_turn(&message, &mut on_delta).await {
            Ok(_) => sse_event("done", ""),
            Err(e) => sse_event("error", &e.to_string()),
        };
        if let Some(event) = terminal {
            let _ = tx.send(event);
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(event);
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build an SSE event with a JSON `{"content": …}` payload. JSON framing
/// keeps fragments containing newlines or carriage returns intact on the
/// wire.
fn sse_event(name: &str, content: &str) -> Option<Event> {
    Event::default()
        .event(name)
        .json_data(serde_json::json!({ "content": content }))
        .ok()
}

// ============ GET /history ============

async fn handle_history(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.session.lock().await;
    let messages = session.history().messages();
    Json(serde_json::json!({ "messages": messages }))
}

// ============ POST /reset ============

async fn handle_reset(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut session = state.session.lock().await;
    session.reset();
    Json(serde_json::json!({ "status": "ok" }))
}

// ============ GET/PUT /session ============

async fn handle_get_session(State(state): State<AppState>) -> Json<SessionSettings> {
    let session = state.session.lock().await;
    Json(session.settings())
}

async fn handle_put_session(
    State(state): State<AppState>,
    Json(settings): Json<SessionSettings>,
) -> Result<Json<SessionSettings>, AppError> {
    if !config::valid_temperature(settings.temperature) {
        return Err(bad_request("temperature must be in [0.0, 2.0]"));
    }
    if settings.model.is_empty() {
        return Err(bad_request("model must not be empty"));
    }

    let mut session = state.session.lock().await;
    session.update_settings(settings);
    Ok(Json(session.settings()))
}
