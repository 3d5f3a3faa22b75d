//! Bounded store connection pool, plus the dedicated publisher/subscriber
//! connections that bypass it (pub/sub connections enter a mode incompatible
//! with general commands — spec.md §4.2).

use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::aio::{ConnectionManager, PubSub};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// Wraps a `deadpool-redis` pool configured with the spec's `min`/`max`
/// bounds, plus a validated-acquire helper (spec.md §4.2: `acquire` blocks
/// until available, `validate` probes a ping, invalid connections are
/// destroyed).
pub struct StorePool {
    pool: Pool,
}

impl StorePool {
    pub async fn new(redis_url: &str, pool_min: usize, pool_max: usize) -> Result<Self> {
        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig::new(pool_max));
        let pool = config.create_pool(Some(Runtime::Tokio1))?;

        let store = Self { pool };
        store.warm(pool_min).await;
        Ok(store)
    }

    /// Eagerly open `pool_min` connections so the pool starts with a warm
    /// minimum instead of growing lazily from zero.
    async fn warm(&self, pool_min: usize) {
        let mut warmed = Vec::with_capacity(pool_min);
        for _ in 0..pool_min {
            match self.pool.get().await {
                Ok(conn) => warmed.push(conn),
                Err(e) => {
                    warn!(error = %e, "failed to pre-warm store connection");
                    break;
                }
            }
        }
        debug!(warmed = warmed.len(), requested = pool_min, "store pool warmed");
        // Dropping `warmed` returns every connection to the pool immediately.
    }

    /// Acquire a connection, retrying the acquisition once if the first
    /// connection fails a PING (spec.md §4.2's `validate`).
    pub async fn get_validated(&self) -> Result<Connection> {
        let mut conn = self.pool.get().await?;
        if Self::validate(&mut conn).await {
            return Ok(conn);
        }
        warn!("store connection failed validation ping, retrying acquisition");
        self.pool.get().await.map_err(StoreError::from)
    }

    async fn validate(conn: &mut Connection) -> bool {
        redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await
            .is_ok()
    }

    pub fn raw(&self) -> &Pool {
        &self.pool
    }

    /// Drains and clears the pool (spec.md §6's `close()`): marks it closed
    /// so every clone of the underlying `deadpool_redis::Pool` — including
    /// the one held by in-flight worker tasks — observes its next `get()`
    /// fail, rather than relying on this struct's own `Drop`.
    pub fn close(&self) {
        self.pool.close();
    }
}

/// Open the dedicated publisher connection (outside the pool).
pub async fn open_publisher(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok(conn)
}

/// Open the dedicated subscriber connection (outside the pool).
pub async fn open_subscriber(redis_url: &str) -> Result<PubSub> {
    let client = redis::Client::open(redis_url)?;
    let conn = client.get_async_pubsub().await?;
    Ok(conn)
}
