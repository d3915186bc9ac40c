//! Transport router: the stream endpoint, the addressed message endpoint,
//! and preflight handling.

use crate::session_table::{SessionEntry, SessionGuard, SessionTable};
use crate::sse;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use widget_relay::{protocol, SessionHandlerFactory};

/// Well-known streaming path.
pub const SSE_PATH: &str = "/sse";
/// Well-known addressed message path.
pub const MESSAGE_PATH: &str = "/message";
/// Health endpoint path.
pub const HEALTH_PATH: &str = "/health";

/// Events queued per session before the addressed-message side blocks.
const SESSION_EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<SessionHandlerFactory>,
    pub sessions: Arc<SessionTable>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing sessionId query parameter")]
    MissingSessionId,

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::MissingSessionId => StatusCode::BAD_REQUEST,
            ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (code, cors_origin(), body).into_response()
    }
}

fn cors_origin() -> [(header::HeaderName, HeaderValue); 1] {
    [(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    )]
}

/// Build the relay routes.
///
/// Non-declared methods on the well-known paths fall through to 404,
/// same as unknown paths.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            SSE_PATH,
            get(open_stream).options(preflight).fallback(not_found),
        )
        .route(
            MESSAGE_PATH,
            post(post_message).options(preflight).fallback(not_found),
        )
        .route(HEALTH_PATH, get(health))
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Answer preflight without touching any session.
async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("content-type"),
            ),
        ],
    )
}

/// Open one long-lived stream and register its session.
///
/// The session is inserted only after the response stream exists; from that
/// point the stream's guard owns removal, so an aborted handshake still
/// tears down exactly once.
async fn open_stream(State(st): State<AppState>) -> Result<Response, ApiError> {
    let handler = st
        .factory
        .create()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let id = Uuid::new_v4().to_string();
    let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
    let guard = SessionGuard::new(st.sessions.clone(), id.clone());
    let prelude = sse::event_chunk("endpoint", &format!("{MESSAGE_PATH}?sessionId={id}"));
    let stream = sse::session_event_stream(prelude, events_rx, guard);

    st.sessions
        .insert(id.clone(), SessionEntry::new(handler, events_tx))
        .await;
    info!(session = %id, "stream opened");

    Ok(sse::sse_response(stream))
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Route one addressed message to its session's handler.
///
/// The protocol reply travels over the session's open stream; the POST
/// response is only a transport-level acknowledgement.
async fn post_message(
    State(st): State<AppState>,
    Query(params): Query<MessageParams>,
    payload: Result<Json<protocol::Request>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = params.session_id.ok_or(ApiError::MissingSessionId)?;
    let Json(message) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let entry = st
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::UnknownSession(id.clone()))?;

    // Per-session mutex, held through the stream write: one request is
    // processed and its reply queued before the next request runs.
    let mut handler = entry.handler.lock().await;
    if let Some(reply) = handler.handle(message).await {
        let encoded =
            serde_json::to_string(&reply).map_err(|e| ApiError::Internal(e.to_string()))?;
        if entry.events_tx.send(sse::message_chunk(&encoded)).await.is_err() {
            // Client is gone; the stream guard will run, but don't leave the
            // entry to a lost close event.
            warn!(session = %id, "session stream closed mid-reply");
            st.sessions.remove(&id).await;
            return Err(ApiError::Internal("session stream closed".to_string()));
        }
    }
    drop(handler);

    Ok((
        StatusCode::ACCEPTED,
        cors_origin(),
        Json(json!({ "status": "accepted", "sessionId": id })),
    )
        .into_response())
}
