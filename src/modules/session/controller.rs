use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::modules::session::{
    error::SessionError,
    model::SessionView,
    schema::{
        CacheStatsResponse, CreateSessionResponse, MessageResponse, SessionListResponse,
        UpdateTurnsRequest, UpdateTurnsResponse,
    },
};
use crate::services::auth::Owner;
use crate::AppState;

pub type ApiError = (StatusCode, Json<MessageResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

/// Storage details are logged by the manager and never sent to clients.
pub fn session_error(e: SessionError) -> ApiError {
    match e {
        SessionError::NotFound => api_error(StatusCode::NOT_FOUND, "Session not found"),
        SessionError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        SessionError::Conflict(_) => api_error(StatusCode::CONFLICT, e.to_string()),
        SessionError::Storage(_) | SessionError::Corrupt(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

pub fn parse_session_id(id: &str) -> Result<String, ApiError> {
    Uuid::parse_str(id)
        .map(|uuid| uuid.to_string())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid ID format"))
}

pub async fn create_session(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session_id = state
        .sessions
        .create(owner.as_deref())
        .await
        .map_err(session_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            created: true,
        }),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let id = parse_session_id(&id)?;

    match state.sessions.get(&id, owner.as_deref()).await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err(session_error(SessionError::NotFound)),
        Err(e) => Err(session_error(e)),
    }
}

pub async fn update_turns(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTurnsRequest>,
) -> Result<Json<UpdateTurnsResponse>, ApiError> {
    if let Err(e) = payload.validate() {
        return Err(api_error(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let id = parse_session_id(&id)?;

    let turns = payload
        .turns
        .into_iter()
        .map(|t| t.into_input())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Malformed turn list"))?;

    let version = match payload.version {
        Some(expected) => {
            state
                .sessions
                .update_at_version(&id, turns, owner.as_deref(), expected)
                .await
        }
        None => state.sessions.update(&id, turns, owner.as_deref()).await,
    }
    .map_err(session_error)?;

    Ok(Json(UpdateTurnsResponse {
        message: "Session updated".to_string(),
        version,
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(owner_id) = owner.0 else {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Authentication required to delete a session",
        ));
    };

    let id = parse_session_id(&id)?;

    state
        .sessions
        .delete(&id, &owner_id)
        .await
        .map_err(session_error)?;

    Ok(Json(MessageResponse {
        message: "Session deleted successfully".to_string(),
    }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state
        .sessions
        .list_all(owner.as_deref())
        .await
        .map_err(session_error)?;

    Ok(Json(SessionListResponse {
        total: sessions.len(),
        data: sessions,
    }))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache_stats = state.sessions.cache_stats().await;
    if let crate::services::cache::CacheStatsReport::Error { error } = &cache_stats {
        error!(error = %error, "cache statistics unavailable");
    }

    Json(CacheStatsResponse {
        status: "success",
        cache_stats,
    })
}
