use axum::{extract::State, http::StatusCode, Json};
use tracing::error;
use validator::Validate;

use crate::modules::chat::schema::{ChatRequest, ChatResponse, ReplyMessage};
use crate::modules::session::{
    controller::{api_error, parse_session_id, session_error, ApiError},
    model::{Role, TurnInput},
    SessionError,
};
use crate::services::auth::Owner;
use crate::services::llm::LlmError;
use crate::AppState;

/// One chat turn: load history, ask the reply producer, persist the full
/// history including the user message and the reply.
pub async fn chat(
    State(state): State<AppState>,
    owner: Owner,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if let Err(e) = payload.validate() {
        return Err(api_error(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let owner_id = owner.as_deref();

    let session_id = match payload.session_id.as_deref() {
        Some(id) => parse_session_id(id)?,
        None => state
            .sessions
            .create(owner_id)
            .await
            .map_err(session_error)?,
    };

    let session = state
        .sessions
        .get(&session_id, owner_id)
        .await
        .map_err(session_error)?
        .ok_or_else(|| session_error(SessionError::NotFound))?;

    let mut turns: Vec<TurnInput> = session.turns.iter().map(TurnInput::from).collect();
    turns.push(TurnInput::user(payload.message));

    let reply = state
        .replies
        .reply(&turns)
        .await
        .and_then(|reply| {
            if reply.content.trim().is_empty() {
                Err(LlmError::InvalidResponse("empty reply".to_string()))
            } else {
                Ok(reply)
            }
        })
        .map_err(|e| {
            error!(session_id = %session_id, error = %e, "reply generation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    turns.push(TurnInput::assistant(reply.content.clone()));

    // Another request may have written this session while the reply was
    // being generated; persisting against the version read above turns that
    // into a 409 instead of silently replacing its turns.
    state
        .sessions
        .update_at_version(&session_id, turns, owner_id, session.version)
        .await
        .map_err(session_error)?;

    Ok(Json(ChatResponse {
        session_id,
        message: ReplyMessage {
            role: Role::Assistant,
            content: reply.content,
        },
        model: reply.model,
        usage: reply.usage,
    }))
}
