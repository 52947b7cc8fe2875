use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::modules::session::model::Role;
use crate::services::llm::UsageInfo;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, message = "Message cannot be empty"))]
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReplyMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: ReplyMessage,
    pub model: String,
    pub usage: Option<UsageInfo>,
}
