#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chatline::{
    app,
    config::database::{self, DatabasePool},
    modules::session::{model::TurnInput, SessionManager},
    services::{
        auth::StaticTokenResolver,
        cache::{BackendInfo, CacheBackend, CacheError, MemoryCache, SessionCache},
        llm::{LlmError, Reply, ReplyProducer, UsageInfo},
    },
    AppState,
};

pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";

pub async fn temp_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    // Leak the directory so the database outlives this helper.
    std::mem::forget(dir);
    database::connect(&url).await.unwrap()
}

/// A backend that behaves like an unreachable Redis.
pub struct UnreachableCache;

#[async_trait]
impl CacheBackend for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Timeout)
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), CacheError> {
        Err(CacheError::Timeout)
    }
    async fn expire(&self, _key: &str, _ttl: u64) -> Result<(), CacheError> {
        Err(CacheError::Timeout)
    }
    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Timeout)
    }
    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Timeout)
    }
    async fn info(&self) -> Result<BackendInfo, CacheError> {
        Err(CacheError::Timeout)
    }
}

pub enum CacheMode {
    Memory,
    Unreachable,
    Disabled,
}

pub struct Harness {
    pub sessions: Arc<SessionManager>,
    pub pool: DatabasePool,
    pub memory: Option<Arc<MemoryCache>>,
}

pub async fn harness(mode: CacheMode) -> Harness {
    let pool = temp_pool().await;
    let timeout = Duration::from_millis(200);

    let (cache, memory) = match mode {
        CacheMode::Memory => {
            let memory = Arc::new(MemoryCache::new());
            (SessionCache::new(memory.clone(), 7200, timeout), Some(memory))
        }
        CacheMode::Unreachable => (
            SessionCache::new(Arc::new(UnreachableCache), 7200, timeout),
            None,
        ),
        CacheMode::Disabled => (SessionCache::disabled(), None),
    };

    Harness {
        sessions: Arc::new(SessionManager::new(pool.clone(), cache)),
        pool,
        memory,
    }
}

/// Replies with the last user message echoed back and records every history
/// it was given.
#[derive(Default)]
pub struct EchoReplies {
    pub seen: Mutex<Vec<Vec<TurnInput>>>,
}

#[async_trait]
impl ReplyProducer for EchoReplies {
    async fn reply(&self, history: &[TurnInput]) -> Result<Reply, LlmError> {
        self.seen.lock().unwrap().push(history.to_vec());

        let last = history
            .last()
            .map(|t| t.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse("empty history".to_string()))?;

        Ok(Reply {
            content: format!("echo: {last}"),
            model: "echo-1".to_string(),
            usage: Some(UsageInfo {
                prompt_tokens: history.len() as u32,
                completion_tokens: 1,
                total_tokens: history.len() as u32 + 1,
            }),
        })
    }
}

pub struct FailingReplies;

#[async_trait]
impl ReplyProducer for FailingReplies {
    async fn reply(&self, _history: &[TurnInput]) -> Result<Reply, LlmError> {
        Err(LlmError::ApiError("upstream unavailable".to_string()))
    }
}

pub fn test_server(harness: &Harness, replies: Arc<dyn ReplyProducer>) -> TestServer {
    let auth = StaticTokenResolver::parse(&format!(
        "{ALICE_TOKEN}:alice,{BOB_TOKEN}:bob,stale-token:carol:1000"
    ))
    .unwrap();

    let state = AppState {
        sessions: harness.sessions.clone(),
        replies,
        auth: Arc::new(auth),
    };

    TestServer::new(app(state)).unwrap()
}
