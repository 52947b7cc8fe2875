//! Session manager: the single authority for session existence, ownership
//! and the read/write paths that keep the fast cache coherent with the
//! durable store.
//!
//! The store is authoritative. The cache holds disposable snapshots: reads
//! go cache-first and repopulate on a miss, writes commit to the store first
//! and then refresh the cache best-effort. Cache failures never surface.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::database::DatabasePool;
use crate::modules::session::crud::SessionCrud;
use crate::modules::session::error::SessionError;
use crate::modules::session::model::{SessionSummary, SessionView, TurnInput};
use crate::services::cache::{CacheStatsReport, SessionCache};

/// In-process write guards keyed by session id. A second writer for the same
/// session is turned away instead of queued. This keeps the store write and
/// the cache refresh that follows it from interleaving with another writer;
/// lost updates across a read-modify-write cycle are caught by the session
/// version instead.
#[derive(Clone, Default)]
struct SessionLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

struct WriteGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    fn try_acquire(&self, session_id: &str) -> Result<WriteGuard, SessionError> {
        let lock = self
            .inner
            .entry(session_id.to_string())
            .or_default()
            .clone();

        let guard = lock
            .try_lock_owned()
            .map_err(|_| SessionError::Conflict(session_id.to_string()))?;

        Ok(WriteGuard {
            locks: self.inner.clone(),
            session_id: session_id.to_string(),
            guard: Some(guard),
        })
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map itself still references an idle lock.
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct SessionManager {
    crud: SessionCrud,
    cache: SessionCache,
    locks: SessionLocks,
}

impl SessionManager {
    pub fn new(pool: DatabasePool, cache: SessionCache) -> Self {
        Self {
            crud: SessionCrud::new(pool),
            cache,
            locks: SessionLocks::default(),
        }
    }

    /// Allocates a session. The cache is left cold until the first read.
    pub async fn create(&self, owner_id: Option<&str>) -> Result<String, SessionError> {
        let session_id = Uuid::new_v4().to_string();

        self.crud
            .create(&session_id, owner_id, Utc::now())
            .await
            .inspect_err(|e| error!(error = %e, "failed to create session"))?;

        info!(session_id = %session_id, owner_id = ?owner_id, "session created");
        Ok(session_id)
    }

    /// Cache-aside read. Returns `None` for unknown, soft-deleted or
    /// foreign-owned sessions alike.
    pub async fn get(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<SessionView>, SessionError> {
        if let Some(view) = self.cache.fetch(session_id).await {
            // Ownership never changes after creation, so the cached owner is authoritative.
            return Ok(match owner_id {
                Some(owner) if view.owner_id.as_deref() != Some(owner) => None,
                _ => Some(view),
            });
        }

        let view = self
            .crud
            .find_view(session_id, owner_id)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "failed to load session"))?;

        if let Some(ref view) = view {
            self.cache.store(view).await;
        }

        Ok(view)
    }

    /// Replaces the full turn list of a session unconditionally and returns
    /// the new version.
    ///
    /// Turns are validated before anything is written. The store write is a
    /// single transaction; the cache is only touched after it commits.
    pub async fn update(
        &self,
        session_id: &str,
        turns: Vec<TurnInput>,
        owner_id: Option<&str>,
    ) -> Result<i64, SessionError> {
        self.write(session_id, turns, owner_id, None).await
    }

    /// Like `update`, but only applies when the session is still at
    /// `version`, the value carried by the `SessionView` the caller built its
    /// turn list from. A write that landed in between yields `Conflict`.
    pub async fn update_at_version(
        &self,
        session_id: &str,
        turns: Vec<TurnInput>,
        owner_id: Option<&str>,
        version: i64,
    ) -> Result<i64, SessionError> {
        self.write(session_id, turns, owner_id, Some(version)).await
    }

    async fn write(
        &self,
        session_id: &str,
        turns: Vec<TurnInput>,
        owner_id: Option<&str>,
        expected_version: Option<i64>,
    ) -> Result<i64, SessionError> {
        validate_turns(&turns)?;

        let _guard = self.locks.try_acquire(session_id)?;

        let result = self
            .crud
            .replace_turns(session_id, owner_id, &turns, expected_version, Utc::now())
            .await;

        let version = match result {
            Ok(Some(version)) => version,
            Ok(None) => return Err(SessionError::NotFound),
            Err(e @ SessionError::Conflict(_)) => {
                warn!(session_id, expected_version = ?expected_version, "stale session version, rejecting write");
                // The caller's view may have come from a stale snapshot.
                self.cache.evict(session_id).await;
                return Err(e);
            }
            Err(e) => {
                error!(session_id, error = %e, "session update rolled back");
                return Err(e);
            }
        };

        self.refresh_cache(session_id).await;
        Ok(version)
    }

    /// Soft-deletes a session owned by `owner_id`.
    pub async fn delete(&self, session_id: &str, owner_id: &str) -> Result<(), SessionError> {
        let deleted = self
            .crud
            .soft_delete(session_id, owner_id)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "failed to delete session"))?;

        if !deleted {
            return Err(SessionError::NotFound);
        }

        self.cache.bury(session_id).await;
        info!(session_id, "session deleted");
        Ok(())
    }

    /// Lists active sessions straight from the store; listings are never cached.
    pub async fn list_all(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<SessionSummary>, SessionError> {
        self.crud
            .list_active(owner_id)
            .await
            .inspect_err(|e| error!(error = %e, "failed to list sessions"))
    }

    pub async fn cache_stats(&self) -> CacheStatsReport {
        match self.cache.stats().await {
            Ok(stats) => CacheStatsReport::Stats(stats),
            Err(e) => CacheStatsReport::Error {
                error: e.to_string(),
            },
        }
    }

    /// Soft-deletes sessions idle for longer than `retention` and drops their
    /// cache entries. Returns the number of sessions swept.
    pub async fn sweep_inactive(&self, retention: chrono::Duration) -> Result<usize, SessionError> {
        let cutoff = Utc::now() - retention;
        let swept = self.crud.deactivate_idle(cutoff).await?;

        futures::future::join_all(swept.iter().map(|id| self.cache.bury(id))).await;

        if !swept.is_empty() {
            info!(count = swept.len(), "swept inactive sessions");
        }
        Ok(swept.len())
    }

    pub async fn close(&self) {
        self.crud.pool().close().await;
    }

    async fn refresh_cache(&self, session_id: &str) {
        if !self.cache.is_enabled() {
            return;
        }

        match self.crud.find_view(session_id, None).await {
            Ok(Some(view)) => self.cache.store(&view).await,
            Ok(None) => self.cache.evict(session_id).await,
            Err(e) => {
                warn!(session_id, error = %e, "could not rebuild snapshot, evicting");
                self.cache.evict(session_id).await;
            }
        }
    }
}

fn validate_turns(turns: &[TurnInput]) -> Result<(), SessionError> {
    let mut seen = HashSet::new();

    for (index, turn) in turns.iter().enumerate() {
        if turn.content.is_empty() {
            return Err(SessionError::Validation(format!(
                "turn {index}: content cannot be empty"
            )));
        }
        if let Some(id) = &turn.id {
            if id.is_empty() {
                return Err(SessionError::Validation(format!(
                    "turn {index}: id cannot be empty"
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(SessionError::Validation(format!(
                    "turn {index}: duplicate id {id}"
                )));
            }
        }
    }

    Ok(())
}
