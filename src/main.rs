use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chatline::{
    app, config,
    modules::session::SessionManager,
    services::{auth::StaticTokenResolver, llm::LlmClient},
    AppState,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatline=info,tower_http=info")),
        )
        .init();

    let settings = config::Settings::from_env()?;

    let pool = config::database::DatabasePool::open(&settings.store)
        .await
        .context("failed to open session store")?;
    let cache = config::redis::session_cache(&settings).await;
    let sessions = Arc::new(SessionManager::new(pool, cache));

    let auth = StaticTokenResolver::parse(&settings.auth_tokens)?;
    if settings.llm.api_key.is_none() {
        warn!("LLM_API_KEY not set, chat replies will fail");
    }

    let replies = LlmClient::new(settings.llm.clone());
    info!(model = replies.default_model(), "reply producer configured");

    let state = AppState {
        sessions: sessions.clone(),
        replies: Arc::new(replies),
        auth: Arc::new(auth),
    };

    let sweeper = settings
        .sweep_interval
        .map(|period| spawn_sweeper(sessions.clone(), period, settings.retention));

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    sessions.close().await;
    info!("session store closed");

    Ok(())
}

fn spawn_sweeper(
    sessions: Arc<SessionManager>,
    period: Duration,
    retention: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = sessions.sweep_inactive(retention).await {
                warn!(error = %e, "retention sweep failed");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
