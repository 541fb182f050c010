//! HTTP Surface
//!
//! The platform's outward face: a plain chat endpoint, an OpenAI-compatible
//! facade, and introspection routes (health, status, history, models). Both
//! chat endpoints support streaming (SSE of chat-completion chunks) and
//! buffered modes; `/chat` defaults to buffered, the OpenAI facade defaults
//! to streaming.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use kestrel_core::events::RunEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::run::RunEngine;
use crate::server::stream::{event_frames, frame_data, StreamIdentity};

/// Capacity of the run event channel; producers block (backpressure) when a
/// slow client falls this far behind.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RunEngine>,
}

/// Build the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/history", get(history))
        .route("/chat", post(chat))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .with_state(state)
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub status: String,
    pub duration_seconds: f64,
    pub workers_used: Vec<String>,
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct CompletionsRequest {
    pub messages: Vec<CompletionsMessage>,
    #[serde(default)]
    pub model: Option<String>,
    /// The facade defaults to streaming; pass `false` for one JSON body.
    #[serde(default = "default_true")]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompletionsMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_n")]
    pub n: usize,
}

fn default_true() -> bool {
    true
}

fn default_history_n() -> usize {
    10
}

// ============================================================================
// Handlers
// ============================================================================

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "kestrel",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "model": state.engine.config().generation.facade_model,
        "endpoints": {
            "chat": "/chat",
            "completions": "/v1/chat/completions",
            "models": "/v1/models",
            "status": "/status",
            "health": "/health",
            "history": "/history"
        }
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.engine.config();
    let corpora = state.engine.store().list_corpora();
    let workers: Vec<serde_json::Value> = config
        .workers
        .iter()
        .map(|w| {
            json!({
                "id": w.id,
                "model": w.model,
                "requires_evidence": w.requires_evidence,
                "timeout_ms": w.timeout_ms,
            })
        })
        .collect();
    Json(json!({
        "status": "online",
        "corpora": corpora,
        "workers": workers,
        "generation": {
            "base_url": config.generation.base_url,
            "default_model": config.generation.default_model,
            "embed_model": config.generation.embed_model,
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    match state.engine.memory().recent(params.n) {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let created = Utc::now().timestamp();
    let data: Vec<serde_json::Value> = state
        .engine
        .registry()
        .ids()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "kestrel",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.query.trim().is_empty() {
        return error_response(&AppError::validation("query cannot be empty"));
    }
    let session_id = request.session_id.clone().unwrap_or_else(|| "default".to_string());
    info!(target: "kestrel_server", session = %session_id, stream = request.stream, "chat request");

    if request.stream {
        return streaming_response(state, request.query).into_response();
    }

    match run_buffered(&state, &request.query).await {
        Ok(record) => Json(ChatResponse {
            response: record.synthesis_text.clone(),
            status: "success".to_string(),
            duration_seconds: record.duration_seconds(),
            workers_used: record
                .selected_workers
                .iter()
                .map(|w| w.to_string())
                .collect(),
            session_id,
            timestamp: Utc::now().to_rfc3339(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<CompletionsRequest>,
) -> Response {
    // The last user message carries the query.
    let query = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.trim().to_string())
        .unwrap_or_default();
    if query.is_empty() {
        return error_response(&AppError::validation("no user message provided"));
    }

    if request.stream {
        return streaming_response(state, query).into_response();
    }

    let model = request
        .model
        .unwrap_or_else(|| state.engine.config().generation.facade_model.clone());
    match run_buffered(&state, &query).await {
        Ok(record) => Json(json!({
            "id": format!("chatcmpl-{}", Utc::now().timestamp()),
            "object": "chat.completion",
            "created": Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": record.synthesis_text },
                "finish_reason": "stop",
            }],
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Run plumbing
// ============================================================================

/// Run to completion, draining (and discarding) the event stream.
async fn run_buffered(
    state: &AppState,
    query: &str,
) -> Result<kestrel_core::types::RunRecord, AppError> {
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    // The drainer keeps the channel open so the engine never sees a
    // disconnect; buffered callers only want the final record.
    let drainer = tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let result = state
        .engine
        .run(query, tx, CancellationToken::new())
        .await;
    let _ = drainer.await;
    result
}

/// Launch a run and expose its event stream as SSE chunk frames.
fn streaming_response(
    state: AppState,
    query: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<RunEvent>(EVENT_CHANNEL_CAPACITY);
    let identity = StreamIdentity::new(&state.engine.config().generation.facade_model);

    tokio::spawn(async move {
        // Errors already surface as terminal stream events; a dropped client
        // cancels the run through the engine's channel watchdog.
        let _ = state
            .engine
            .run(&query, tx, CancellationToken::new())
            .await;
    });

    let stream = ReceiverStream::new(rx).flat_map(move |event| {
        let frames = event_frames(&identity, &event);
        futures_util::stream::iter(
            frames
                .into_iter()
                .map(|frame| Ok(Event::default().data(frame_data(&frame)))),
        )
    });

    Sse::new(stream)
}

/// Map an application error onto an HTTP response. Invalid requests are 400;
/// everything that prevented output is 500 with the error kind in the body.
fn error_response(error: &AppError) -> Response {
    let status = match error {
        AppError::Validation(_) | AppError::NotFound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": {
                "kind": error.kind(),
                "message": error.to_string(),
            }
        })),
    )
        .into_response()
}
