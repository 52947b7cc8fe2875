use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ConfigError;
use crate::modules::session::schema::MessageResponse;
use crate::AppState;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid authentication scheme. Expected 'Bearer'")]
    InvalidScheme,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Credential has expired")]
    Expired,
}

/// Maps an inbound credential to a stable owner id.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Clone)]
struct TokenGrant {
    owner_id: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Bearer tokens configured up front as `token:owner[:unix_expiry]` entries.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, TokenGrant>,
}

impl StaticTokenResolver {
    pub fn parse(entries: &str) -> Result<Self, ConfigError> {
        let invalid = |entry: &str| ConfigError::Invalid {
            key: "AUTH_TOKENS",
            value: entry.to_string(),
        };

        let mut tokens = HashMap::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().filter(|t| !t.is_empty()).ok_or_else(|| invalid(entry))?;
            let owner_id = parts.next().filter(|o| !o.is_empty()).ok_or_else(|| invalid(entry))?;
            let expires_at = match parts.next() {
                Some(raw) => {
                    let secs: i64 = raw.parse().map_err(|_| invalid(entry))?;
                    Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid(entry))?)
                }
                None => None,
            };

            tokens.insert(
                token.to_string(),
                TokenGrant {
                    owner_id: owner_id.to_string(),
                    expires_at,
                },
            );
        }

        Ok(Self { tokens })
    }
}

#[async_trait]
impl OwnerResolver for StaticTokenResolver {
    async fn resolve(&self, credential: &str) -> Result<String, AuthError> {
        let grant = self
            .tokens
            .get(credential)
            .ok_or(AuthError::InvalidCredential)?;

        match grant.expires_at {
            Some(expires_at) if expires_at <= Utc::now() => Err(AuthError::Expired),
            _ => Ok(grant.owner_id.clone()),
        }
    }
}

/// The requesting owner, `None` for anonymous requests. A request without an
/// `Authorization` header is anonymous; a present but bad credential is
/// rejected with 401.
#[derive(Debug, Clone)]
pub struct Owner(pub Option<String>);

impl Owner {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

fn unauthorized(e: AuthError) -> (StatusCode, Json<MessageResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(MessageResponse { message: e.to_string() }),
    )
}

impl FromRequestParts<AppState> for Owner {
    type Rejection = (StatusCode, Json<MessageResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Owner(None));
        };

        let header = header
            .to_str()
            .map_err(|_| unauthorized(AuthError::InvalidScheme))?;
        let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));

        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(unauthorized(AuthError::InvalidScheme));
        }

        let owner_id = state.auth.resolve(token.trim()).await.map_err(unauthorized)?;
        Ok(Owner(Some(owner_id)))
    }
}
