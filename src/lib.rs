use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::modules::session::SessionManager;
use crate::services::{auth::OwnerResolver, llm::ReplyProducer};

pub mod config;
pub mod modules;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub replies: Arc<dyn ReplyProducer>,
    pub auth: Arc<dyn OwnerResolver>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(modules::session::routes::routes())
        .merge(modules::chat::routes::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
