use std::time::Duration;

use adlens_common::{ChatResponse, ResponseBlock, thread_id};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::state::SharedState;

const TIMEOUT_MESSAGE: &str = "That request took too long to complete. Your \
progress is saved; please try again.";

const FAILURE_MESSAGE: &str = "Something went wrong while handling that \
request. Please try again.";

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/sessions/{id}/history", get(session_history))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(state): State<SharedState>) -> Json<Value> {
    let reasoning_ok = state.reasoner.health_check().await.unwrap_or(false);
    Json(json!({
        "status": "ok",
        "reasoning": if reasoning_ok { "ok" } else { "unreachable" },
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    /// Caller identity; authentication is handled upstream of this service.
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    session_id: String,
    response: ChatResponse,
}

async fn chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<Value>)> {
    if request.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message must not be empty" })),
        ));
    }

    let user_id = request.user_id.unwrap_or_else(|| "local".to_string());
    let session_id = request
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    {
        let sessions = state.sessions.lock().await;
        sessions
            .upsert_session(&session_id, &user_id)
            .map_err(internal_error)?;
        sessions
            .append_message(&session_id, "user", &request.message)
            .map_err(internal_error)?;
    }

    // Turns on the same thread run strictly one after another.
    let thread = thread_id(&user_id, &session_id);
    let _guard = state.turn_locks.acquire(&thread).await;

    let budget = Duration::from_secs(state.config.gateway.turn_timeout_secs);
    let turn = tokio::time::timeout(
        budget,
        state
            .orchestrator
            .run_turn(&user_id, &session_id, &request.message),
    )
    .await;

    let response = match turn {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!("turn failed for thread '{thread}': {e}");
            ChatResponse::text(FAILURE_MESSAGE)
        }
        Err(_) => {
            warn!("turn timed out after {budget:?} for thread '{thread}'");
            ChatResponse::text(TIMEOUT_MESSAGE)
        }
    };

    {
        let sessions = state.sessions.lock().await;
        let summary = response
            .blocks
            .iter()
            .find_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("[structured response]");
        if let Err(e) = sessions.append_message(&session_id, "assistant", summary) {
            warn!("failed to record assistant message: {e}");
        }
        let keep = state.config.memory.history_window;
        if let Err(e) = sessions.prune_old_messages(&session_id, keep) {
            warn!("failed to prune session history: {e}");
        }
    }

    info!("turn completed for thread '{thread}'");
    Ok(Json(ChatReply {
        session_id,
        response,
    }))
}

async fn session_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let sessions = state.sessions.lock().await;

    let record = sessions.load_session(&session_id).map_err(internal_error)?;
    if record.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "session not found" })),
        ));
    }

    let limit = state.config.memory.history_window;
    let messages = sessions
        .load_recent_messages(&session_id, limit)
        .map_err(internal_error)?;

    Ok(Json(json!({
        "session_id": session_id,
        "messages": messages
            .iter()
            .map(|m| json!({
                "role": m.role,
                "content": m.content,
                "created_at": m.created_at.to_rfc3339(),
            }))
            .collect::<Vec<_>>(),
    })))
}

fn internal_error(e: adlens_common::Error) -> (StatusCode, Json<Value>) {
    error!("request failed: {e}");
    // Internal detail stays in the logs
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}
