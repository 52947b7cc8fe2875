//! Fast cache adapter for session snapshots.
//!
//! `CacheBackend` is the raw key-value seam (Redis in production, an
//! in-process map for tests and single-node runs). `SessionCache` layers
//! typed snapshots, TTL handling and failure absorption on top: no backend
//! error ever reaches a caller of `fetch`, `store` or `evict`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::modules::session::model::SessionView;

pub const SESSION_KEY_PREFIX: &str = "session:";
/// Marks a session deleted so a snapshot read before the delete is not
/// written back afterwards. Outside the `session:*` pattern on purpose.
pub const TOMBSTONE_KEY_PREFIX: &str = "session-deleted:";
const TOMBSTONE_TTL_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("Cache operation timed out")]
    Timeout,
    #[error("Malformed cache payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Cache is disabled")]
    Disabled,
}

#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub memory_used: String,
    pub connected_clients: u64,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    /// Glob-style key listing. Only `prefix*` patterns need to be supported.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
    async fn info(&self) -> Result<BackendInfo, CacheError>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn info(&self) -> Result<BackendInfo, CacheError> {
        let mut conn = self.conn.clone();
        let info: redis::InfoDict = redis::cmd("INFO").query_async(&mut conn).await?;

        Ok(BackendInfo {
            memory_used: info
                .get::<String>("used_memory_human")
                .unwrap_or_else(|| "N/A".to_string()),
            connected_clients: info.get::<u64>("connected_clients").unwrap_or(0),
        })
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Expiring map with the same observable semantics as the Redis backend.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|e| (e.expires_at > now).then(|| e.value.clone()));

        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CacheError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.expires_at > now && glob_matches(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn info(&self) -> Result<BackendInfo, CacheError> {
        let bytes: usize = self
            .entries
            .iter()
            .map(|e| e.key().len() + e.value.len())
            .sum();

        Ok(BackendInfo {
            memory_used: format!("{bytes}B"),
            connected_clients: 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Session snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub active_cached_sessions: usize,
    pub redis_memory_used: String,
    pub redis_connected_clients: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CacheStatsReport {
    Stats(CacheStats),
    Error { error: String },
}

#[derive(Clone)]
pub struct SessionCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl_secs: u64,
    timeout: Duration,
}

impl SessionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl_secs: u64, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl_secs,
            timeout,
        }
    }

    /// A cache that misses on every read and drops every write.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl_secs: 0,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }

    fn tombstone_key(session_id: &str) -> String {
        format!("{TOMBSTONE_KEY_PREFIX}{session_id}")
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout)?
    }

    /// Returns the cached snapshot and slides its expiry. Any failure reads
    /// as a miss.
    pub async fn fetch(&self, session_id: &str) -> Option<SessionView> {
        let backend = self.backend.as_deref()?;
        let key = Self::key(session_id);

        let raw = match self.bounded(backend.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(session_id, "session cache miss");
                return None;
            }
            Err(e) => {
                warn!(session_id, error = %e, "session cache read failed, using store");
                return None;
            }
        };

        let view = match serde_json::from_str::<SessionView>(&raw) {
            Ok(view) if view.session_id == session_id => view,
            Ok(_) => {
                warn!(session_id, "cached snapshot belongs to another session, evicting");
                self.evict(session_id).await;
                return None;
            }
            Err(e) => {
                warn!(session_id, error = %e, "malformed cached snapshot, evicting");
                self.evict(session_id).await;
                return None;
            }
        };

        if let Err(e) = self.bounded(backend.expire(&key, self.ttl_secs)).await {
            warn!(session_id, error = %e, "failed to extend session cache ttl");
        }

        debug!(session_id, "session cache hit");
        Some(view)
    }

    pub async fn store(&self, view: &SessionView) {
        let Some(backend) = self.backend.as_deref() else {
            return;
        };

        let json = match serde_json::to_string(view) {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %view.session_id, error = %e, "failed to serialize session snapshot");
                return;
            }
        };

        let key = Self::key(&view.session_id);
        if let Err(e) = self.bounded(backend.set_ex(&key, &json, self.ttl_secs)).await {
            warn!(session_id = %view.session_id, error = %e, "session cache write failed");
            return;
        }

        // A delete may have landed between our store read and this write.
        match self
            .bounded(backend.get(&Self::tombstone_key(&view.session_id)))
            .await
        {
            Ok(Some(_)) => {
                debug!(session_id = %view.session_id, "session deleted meanwhile, dropping snapshot");
                self.evict(&view.session_id).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(session_id = %view.session_id, error = %e, "tombstone check failed");
            }
        }
    }

    /// Evicts a deleted session and leaves a short-lived tombstone so that
    /// in-flight `store` calls for it drop their snapshot.
    pub async fn bury(&self, session_id: &str) {
        let Some(backend) = self.backend.as_deref() else {
            return;
        };

        let tombstone = Self::tombstone_key(session_id);
        if let Err(e) = self
            .bounded(backend.set_ex(&tombstone, "1", TOMBSTONE_TTL_SECS))
            .await
        {
            warn!(session_id, error = %e, "failed to write session tombstone");
        }
        self.evict(session_id).await;
    }

    pub async fn evict(&self, session_id: &str) {
        let Some(backend) = self.backend.as_deref() else {
            return;
        };

        if let Err(e) = self.bounded(backend.del(&Self::key(session_id))).await {
            warn!(session_id, error = %e, "session cache eviction failed");
        }
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let backend = self.backend.as_deref().ok_or(CacheError::Disabled)?;
        let pattern = format!("{SESSION_KEY_PREFIX}*");

        let keys = self.bounded(backend.keys(&pattern)).await?;
        let info = self.bounded(backend.info()).await?;

        Ok(CacheStats {
            active_cached_sessions: keys.len(),
            redis_memory_used: info.memory_used,
            redis_connected_clients: info.connected_clients,
        })
    }
}
