//! Route definitions for the chat relay.
//!
//! Provides the health, session reset and streaming chat endpoints.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::StreamExt;
use relay_common::logging::trace_id_from_headers;
use relay_common::Error;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;

use crate::frame::{StreamFrame, NDJSON_CONTENT_TYPE};
use crate::relay::{ChatRequest, Relay};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub model_default: String,
    pub has_api_key: bool,
}

/// Session reset request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Session reset response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub ok: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Error answered before any stream body exists.
#[derive(Debug)]
pub enum ApiError {
    /// A relay error with its mapped status
    Relay(Error),
    /// A request the JSON extractor refused for reasons other than its content
    Rejected(JsonRejection),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Relay(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_) => {
                Self::Relay(Error::Validation(rejection.body_text()))
            }
            other => Self::Rejected(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Relay(err) => (
                StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                ErrorResponse {
                    error: err.to_string(),
                    code: err.kind().to_string(),
                },
            ),
            Self::Rejected(rejection) => (
                rejection.status(),
                ErrorResponse {
                    error: rejection.body_text(),
                    code: "request_rejected".to_string(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build all relay routes.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/session/reset", post(reset_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let client = state.relay.client();
    Json(HealthResponse {
        status: "ok".into(),
        model_default: client.default_model().to_string(),
        has_api_key: client.has_credential(),
    })
}

async fn reset_handler(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, ApiError> {
    let Json(request) = payload?;

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::Validation("sessionId is required".into()))?;

    let existed = state.relay.store().reset(&session_id);
    tracing::info!(session_id = %session_id, existed, "Session reset");

    Ok(Json(ResetResponse { ok: true }))
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let trace_id = trace_id_from_headers(&headers);
    let span = tracing::info_span!(
        "chat_turn",
        trace_id = %trace_id,
        session_id = tracing::field::Empty
    );

    let turn = state.relay.begin(request).instrument(span.clone()).await?;
    span.record("session_id", turn.session_id());

    let (tx, rx) = mpsc::unbounded_channel::<StreamFrame>();
    tokio::spawn(
        async move {
            let mut tx = tx;
            turn.run(&mut tx).await;
        }
        .instrument(span),
    );

    let frames = UnboundedReceiverStream::new(rx).map(|frame| frame.to_line());

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}
