mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use chatline::modules::session::{
    model::{Role, TurnInput},
    SessionManager,
};
use chatline::services::llm::{LlmError, Reply, ReplyProducer};
use common::{harness, test_server, CacheMode, EchoReplies, FailingReplies, ALICE_TOKEN, BOB_TOKEN};
use serde_json::{json, Value};

/// Answers with whitespace only.
struct BlankReplies;

#[async_trait]
impl ReplyProducer for BlankReplies {
    async fn reply(&self, _history: &[TurnInput]) -> Result<Reply, LlmError> {
        Ok(Reply {
            content: " \n".to_string(),
            model: "blank-1".to_string(),
            usage: None,
        })
    }
}

/// Lets another client write to the session while the reply is generated.
struct RacingReplies {
    sessions: Arc<SessionManager>,
    session_id: String,
}

#[async_trait]
impl ReplyProducer for RacingReplies {
    async fn reply(&self, _history: &[TurnInput]) -> Result<Reply, LlmError> {
        self.sessions
            .update(
                &self.session_id,
                vec![TurnInput::user("from B"), TurnInput::assistant("ok")],
                None,
            )
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        Ok(Reply {
            content: "reply to A".to_string(),
            model: "racing-1".to_string(),
            usage: None,
        })
    }
}

#[tokio::test]
async fn test_chat_creates_session_lazily() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(EchoReplies::default()));

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "What documents do I need?" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["content"], "echo: What documents do I need?");
    assert_eq!(body["model"], "echo-1");
    assert_eq!(body["usage"]["total_tokens"], 2);

    let session_id = body["session_id"].as_str().unwrap();
    let view = h.sessions.get(session_id, None).await.unwrap().unwrap();
    assert_eq!(view.title, "What documents do I need?");
    assert_eq!(view.turns.len(), 2);
    assert_eq!(view.turns[0].role, Role::User);
    assert_eq!(view.turns[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_chat_continues_existing_history() {
    let h = harness(CacheMode::Memory).await;
    let replies = Arc::new(EchoReplies::default());
    let server = test_server(&h, replies.clone());

    let first: Value = server
        .post("/api/chat")
        .authorization_bearer(ALICE_TOKEN)
        .json(&json!({ "message": "first" }))
        .await
        .json();
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let response = server
        .post("/api/chat")
        .authorization_bearer(ALICE_TOKEN)
        .json(&json!({ "message": "second", "session_id": session_id }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["session_id"], session_id.as_str());

    // The producer saw the stored history plus the new user turn.
    let seen = replies.seen.lock().unwrap().clone();
    let contents: Vec<&str> = seen[1].iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "echo: first", "second"]);

    let view = h
        .sessions
        .get(&session_id, Some("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.turns.len(), 4);
    assert_eq!(view.title, "first");
    assert_eq!(view.owner_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_chat_rejects_foreign_session() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(EchoReplies::default()));
    let session_id = h.sessions.create(Some("alice")).await.unwrap();

    let response = server
        .post("/api/chat")
        .authorization_bearer(BOB_TOKEN)
        .json(&json!({ "message": "let me in", "session_id": session_id }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let view = h.sessions.get(&session_id, None).await.unwrap().unwrap();
    assert!(view.turns.is_empty());
}

#[tokio::test]
async fn test_chat_empty_message() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(EchoReplies::default()));

    let response = server.post("/api/chat").json(&json!({ "message": "" })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(h.sessions.list_all(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_invalid_session_id() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(EchoReplies::default()));

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "hi", "session_id": "abc" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_reply_failure_leaves_history_untouched() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(FailingReplies));
    let session_id = h.sessions.create(None).await.unwrap();

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "hello", "session_id": session_id }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let view = h.sessions.get(&session_id, None).await.unwrap().unwrap();
    assert!(view.turns.is_empty());
}

#[tokio::test]
async fn test_chat_without_cache() {
    let h = harness(CacheMode::Unreachable).await;
    let server = test_server(&h, Arc::new(EchoReplies::default()));

    let response = server.post("/api/chat").json(&json!({ "message": "ping" })).await;

    response.assert_status_ok();
    let session_id = response.json::<Value>()["session_id"]
        .as_str()
        .unwrap()
        .to_string();
    let view = h.sessions.get(&session_id, None).await.unwrap().unwrap();
    assert_eq!(view.turns[1].content, "echo: ping");
}

#[tokio::test]
async fn test_chat_rejects_write_over_concurrent_change() {
    let h = harness(CacheMode::Memory).await;
    let session_id = h.sessions.create(None).await.unwrap();
    let server = test_server(
        &h,
        Arc::new(RacingReplies {
            sessions: h.sessions.clone(),
            session_id: session_id.clone(),
        }),
    );

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "from A", "session_id": session_id }))
        .await;

    response.assert_status(StatusCode::CONFLICT);

    // The other writer's turns survive; nothing of this request was written.
    let view = h.sessions.get(&session_id, None).await.unwrap().unwrap();
    let contents: Vec<&str> = view.turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["from B", "ok"]);
}

#[tokio::test]
async fn test_chat_blank_reply_is_upstream_failure() {
    let h = harness(CacheMode::Memory).await;
    let server = test_server(&h, Arc::new(BlankReplies));
    let session_id = h.sessions.create(None).await.unwrap();

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "hello", "session_id": session_id }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let view = h.sessions.get(&session_id, None).await.unwrap().unwrap();
    assert!(view.turns.is_empty());
}
