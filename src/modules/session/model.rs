use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("invalid role: {other}")),
        }
    }
}

/// A stored turn as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A turn as submitted to `update`. Omitted ids and timestamps are assigned
/// by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TurnInput {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: None,
            created_at: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

impl From<&Turn> for TurnInput {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
            id: Some(turn.id.clone()),
            created_at: Some(turn.created_at),
        }
    }
}

/// Denormalized read model: session row + conversation title + ordered turns.
/// This is also the payload stored in the fast cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub title: String,
    pub turns: Vec<Turn>,
    /// Turn-list revision. Pass it back to `update_at_version` to detect
    /// writes made since this view was read.
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub message_count: u64,
}

/// Title for a conversation: the first user turn, cut to 50 characters with
/// an ellipsis when longer. `None` when the list has no user turn.
pub fn derive_title(turns: &[TurnInput]) -> Option<String> {
    let first = turns.iter().find(|t| t.role == Role::User)?;

    let mut title: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
    if first.content.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    Some(title)
}

/// Fixed-width RFC 3339 so stored text sorts chronologically.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_truncates_long_user_content() {
        let turns = vec![
            TurnInput::assistant("hi"),
            TurnInput::user("X".repeat(80)),
        ];

        let title = derive_title(&turns).unwrap();
        assert_eq!(title, format!("{}...", "X".repeat(50)));
    }

    #[test]
    fn test_title_keeps_short_content() {
        let turns = vec![TurnInput::user("How do I apply?"), TurnInput::user("later")];
        assert_eq!(derive_title(&turns).as_deref(), Some("How do I apply?"));
    }

    #[test]
    fn test_title_exactly_fifty_chars_has_no_ellipsis() {
        let turns = vec![TurnInput::user("y".repeat(50))];
        assert_eq!(derive_title(&turns).unwrap(), "y".repeat(50));
    }

    #[test]
    fn test_title_counts_characters_not_bytes() {
        let turns = vec![TurnInput::user("ü".repeat(60))];
        let title = derive_title(&turns).unwrap();
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_title_absent_without_user_turn() {
        let turns = vec![TurnInput::system("be brief"), TurnInput::assistant("ok")];
        assert!(derive_title(&turns).is_none());
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = parse_timestamp("2026-01-02T03:04:05.000001Z").unwrap();
        let later = parse_timestamp("2026-01-02T03:04:05.5Z").unwrap();
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }
}
