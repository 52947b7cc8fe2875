use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{info, warn};

use crate::config::Settings;
use crate::services::cache::{RedisCache, SessionCache};

/// Budget for the initial connection attempt, derived from the per-operation
/// cache timeout.
fn connect_timeout(per_operation: Duration) -> Duration {
    per_operation.saturating_mul(10)
}

pub async fn connect(uri: &str) -> redis::RedisResult<ConnectionManager> {
    let client = redis::Client::open(uri)?;
    ConnectionManager::new(client).await
}

/// Builds the session cache from settings. An unset or unreachable Redis
/// yields a disabled cache rather than a startup failure.
pub async fn session_cache(settings: &Settings) -> SessionCache {
    let Some(uri) = settings.redis_uri.as_deref() else {
        info!("REDIS_URI not set, session cache disabled");
        return SessionCache::disabled();
    };

    match tokio::time::timeout(connect_timeout(settings.cache_timeout), connect(uri)).await {
        Ok(Ok(conn)) => {
            info!("connected to redis session cache");
            SessionCache::new(
                Arc::new(RedisCache::new(conn)),
                settings.cache_ttl_secs,
                settings.cache_timeout,
            )
        }
        Ok(Err(e)) => {
            warn!(error = %e, "redis unavailable, session cache disabled");
            SessionCache::disabled()
        }
        Err(_) => {
            warn!("redis connection timed out, session cache disabled");
            SessionCache::disabled()
        }
    }
}
