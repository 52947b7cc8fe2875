use axum::{
    routing::{get, put},
    Router,
};

use crate::modules::session::controller;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/sessions",
            get(controller::list_sessions).post(controller::create_session),
        )
        .route("/api/sessions/stats/cache", get(controller::cache_stats))
        .route(
            "/api/sessions/{id}",
            get(controller::get_session).delete(controller::delete_session),
        )
        .route("/api/sessions/{id}/turns", put(controller::update_turns))
}
