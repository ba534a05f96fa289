//! HTTP transport.
//!
//! Thin axum layer over [`AppContext`]: the browser extension talks JSON, the
//! caller is identified by the `Authorization` header (a bearer user id), and
//! every pipeline outcome maps onto a small set of status codes. No business
//! logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ask::{AppContext, QueryRequest, Reply};
use crate::types::{AssistError, Scope};

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/query", post(query))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{session_id}", get(get_session))
        .with_state(context)
}

/// Binds and serves until the process is stopped.
pub async fn serve(context: Arc<AppContext>, bind_addr: &str) -> Result<(), AssistError> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|err| AssistError::InvalidInput(format!("cannot bind {bind_addr}: {err}")))?;
    info!(bind_addr, "listening");
    axum::serve(listener, router(context))
        .await
        .map_err(|err| AssistError::Storage(err.to_string()))
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AssistError> for ApiError {
    fn from(err: AssistError) -> Self {
        let status = match &err {
            AssistError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AssistError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: "missing Authorization header".to_string(),
        });
    }
    Ok(raw.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct QueryBody {
    user_query: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    current_page_url: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    chat_history: Option<String>,
}

/// An `answer` grounded the query; a `message` explains why it could not be.
#[derive(Serialize)]
struct QueryReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    intent: String,
    scope: String,
}

async fn query(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryReply>, ApiError> {
    let user_id = user_id(&headers)?;
    let scope = match body.scope.as_deref() {
        Some(raw) => Some(raw.parse::<Scope>().map_err(|err| ApiError {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        })?),
        None => None,
    };
    let request = QueryRequest {
        user_query: body.user_query,
        domain: body.domain,
        current_page_url: body.current_page_url,
        scope,
        session_id: body.session_id,
        chat_history: body.chat_history,
    };
    let response = context.assistant.answer(&user_id, &request).await?;
    let (answer, message) = match response.reply {
        Reply::Answer(text) => (Some(text), None),
        Reply::Unsupported(text) => (None, Some(text)),
    };
    Ok(Json(QueryReply {
        answer,
        message,
        intent: response.decision.intent.to_string(),
        scope: response.decision.scope.to_string(),
    }))
}

#[derive(Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    current_url: Option<String>,
    #[serde(default)]
    current_domain: Option<String>,
}

async fn create_session(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user_id = user_id(&headers)?;
    let session_id = context
        .sessions
        .create_session(
            &user_id,
            body.current_url.as_deref(),
            body.current_domain.as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "session_id": session_id })),
    ))
}

#[derive(Serialize)]
struct SessionSummaryReply {
    session_id: String,
    current_url: Option<String>,
    current_domain: Option<String>,
    created_at: String,
    updated_at: String,
}

async fn list_sessions(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummaryReply>>, ApiError> {
    let user_id = user_id(&headers)?;
    let summaries = context.sessions.list_sessions(&user_id).await?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|summary| SessionSummaryReply {
                session_id: summary.session_id,
                current_url: summary.current_url,
                current_domain: summary.current_domain,
                created_at: summary.created_at.to_rfc3339(),
                updated_at: summary.updated_at.to_rfc3339(),
            })
            .collect(),
    ))
}

#[derive(Serialize)]
struct SessionReply {
    session_id: String,
    current_url: Option<String>,
    current_domain: Option<String>,
    chat_messages: Vec<TurnReply>,
}

#[derive(Serialize)]
struct TurnReply {
    message: String,
    message_type: String,
    detected_intent: Option<String>,
    created_at: String,
}

async fn get_session(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SessionReply>, ApiError> {
    let user_id = user_id(&headers)?;
    let details = context.sessions.get_session(&session_id, &user_id).await?;
    Ok(Json(SessionReply {
        session_id: details.session_id,
        current_url: details.current_url,
        current_domain: details.current_domain,
        chat_messages: details
            .chat_messages
            .into_iter()
            .map(|turn| TurnReply {
                message: turn.message,
                message_type: turn.message_type.to_string(),
                detected_intent: turn.detected_intent,
                created_at: turn.created_at.to_rfc3339(),
            })
            .collect(),
    }))
}
