//! Run with: cargo run --bin sweep
//!
//! Soft-deletes sessions idle for longer than SESSION_RETENTION_DAYS.

use chatline::{config, modules::session::SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;

    println!("Opening session store...");
    let pool = config::database::DatabasePool::open(&settings.store).await?;
    let cache = config::redis::session_cache(&settings).await;
    let sessions = SessionManager::new(pool, cache);

    let swept = sessions.sweep_inactive(settings.retention).await?;
    println!(
        "✓ Soft-deleted {} session(s) idle for more than {} days",
        swept, settings.retention_days
    );

    sessions.close().await;
    Ok(())
}
