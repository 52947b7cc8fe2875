use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::modules::session::model::{Role, SessionSummary, TurnInput};
use crate::services::cache::CacheStatsReport;

fn validate_role(role: &str) -> Result<(), ValidationError> {
    role.parse::<Role>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("role").with_message("Role must be system, user or assistant".into()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TurnPayload {
    #[validate(required(message = "Role is required"), custom(function = "validate_role"))]
    pub role: Option<String>,
    #[validate(
        required(message = "Content is required"),
        length(min = 1, message = "Content cannot be empty")
    )]
    pub content: Option<String>,
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl TurnPayload {
    /// Converts a payload that has already passed validation.
    pub fn into_input(self) -> Option<TurnInput> {
        Some(TurnInput {
            role: self.role?.parse().ok()?,
            content: self.content?,
            id: self.id,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTurnsRequest {
    #[validate(nested)]
    pub turns: Vec<TurnPayload>,
    /// Version of the session the turn list was built from. When present,
    /// the write is rejected with 409 if the session has changed since.
    pub version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpdateTurnsResponse {
    pub message: String,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub data: Vec<SessionSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub status: &'static str,
    pub cache_stats: CacheStatsReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
