use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threadrun_common::{ConversationKey, Error, Message, Role};
use tracing::{info, warn};

use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptResponse {
    pub response: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub user_id: String,
    pub assistant_id: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for HistoryEntry {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// A core error rendered as `{ "error", "kind" }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Transport(_) | Error::Provider { .. } => StatusCode::BAD_GATEWAY,
            e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.0.kind(), "request failed: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

/// POST /chat: relay one user message and wait for the assistant's reply.
pub async fn chat(
    State(state): State<SharedState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body?;
    let key = ConversationKey::from_parts(
        &request.user_id,
        request.assistant_id.as_deref(),
        request.conversation_id.as_deref(),
    )?;

    let response = state.orchestrator.converse(&key, &request.message).await?;
    Ok(Json(ChatResponse { response }))
}

/// GET /chat/history: visible messages of a conversation, oldest first.
pub async fn history(
    State(state): State<SharedState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query?;
    let key = ConversationKey::from_parts(
        &query.user_id,
        query.assistant_id.as_deref(),
        query.conversation_id.as_deref(),
    )?;

    let messages = state.orchestrator.history(&key).await?;
    Ok(Json(HistoryResponse {
        messages: messages.into_iter().map(HistoryEntry::from).collect(),
    }))
}

/// POST /openai-test: one chat completion with the configured credential,
/// bypassing threads and runs.
pub async fn openai_test(
    State(state): State<SharedState>,
    body: Result<Json<PromptRequest>, JsonRejection>,
) -> Result<Json<PromptResponse>, ApiError> {
    let Json(request) = body?;
    if request.prompt.trim().is_empty() {
        return Err(Error::InvalidRequest("prompt must not be empty".into()).into());
    }

    let model = &state.config.assistant.completion_model;
    let response = state.openai.complete_prompt(model, &request.prompt).await?;
    info!(model = %model, chars = response.len(), "credential check answered");
    Ok(Json(PromptResponse { response }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use threadrun_common::RunFailureCause;

    use super::*;

    fn status_of(error: Error) -> StatusCode {
        ApiError(error).status()
    }

    #[test]
    fn invalid_request_is_400() {
        assert_eq!(
            status_of(Error::InvalidRequest("user_id must not be empty".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_failures_are_502() {
        assert_eq!(
            status_of(Error::Transport("connection refused".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(Error::Provider {
                status: 429,
                detail: "rate limited".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn run_timeout_is_504() {
        let error = Error::RunFailure {
            run_id: "run_1".into(),
            cause: RunFailureCause::Timeout {
                elapsed: Duration::from_secs(120),
            },
        };
        assert_eq!(status_of(error), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn other_failures_are_500() {
        let failed = Error::RunFailure {
            run_id: "run_1".into(),
            cause: RunFailureCause::Status {
                status: "failed".into(),
                last_error: Some("server_error: boom".into()),
            },
        };
        assert_eq!(status_of(failed), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_of(Error::DataConsistency("no reply".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn history_entry_drops_internal_fields() {
        let message = Message::text("msg_1", Role::Assistant, "hi").with_run("run_1");
        let entry = serde_json::to_value(HistoryEntry::from(message)).unwrap();
        assert_eq!(entry["role"], "assistant");
        assert!(entry.get("run_id").is_none());
        assert!(entry.get("hidden").is_none());
    }
}
