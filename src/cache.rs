//! JSON values in Redis with a read-through helper.
//!
//! Cache failures never fail a request: reads degrade to the source and
//! writes are advisory.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CoreError, CoreResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Cache {
    /// Connects and pings Redis, or returns a bypass cache when caching is
    /// switched off.
    pub async fn connect(config: &CacheConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            info!("Cache disabled; reads go straight to the source");
            return Ok(Self::disabled());
        }

        let client = redis::Client::open(config.redis_url())
            .map_err(|e| anyhow::anyhow!("Invalid Redis address {}: {e}", config.redis_addr))?;

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out connecting to Redis at {}", config.redis_addr))?
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {e}"))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis PING failed: {e}"))?;

        info!(addr = %config.redis_addr, "Connected to Redis cache");
        Ok(Self { conn: Some(conn) })
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self { conn: None }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// `Ok(None)` on a miss or when bypassed. Undecodable entries count as a
    /// miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(None);
        };

        let data: Option<String> = conn.get(key).await?;
        let Some(json) = data else {
            debug!(key, "Cache MISS");
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(value) => {
                debug!(key, "Cache HIT");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CoreResult<()> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(());
        };
        let json = serde_json::to_string(value).map_err(|e| CoreError::Cache(e.to_string()))?;
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    /// `Ok(())` when bypassed.
    pub async fn ping(&self) -> CoreResult<()> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(());
        };
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> CoreResult<()> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(());
        };
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Batches writes and sends them in one round trip on `exec`.
    #[must_use]
    pub fn pipeline(&self) -> CachePipeline {
        CachePipeline {
            conn: self.conn.clone(),
            pipe: redis::pipe(),
            queued: 0,
        }
    }

    /// Read-through: a hit is returned as is, otherwise `fetch` runs and its
    /// value is stored best-effort. Only `fetch` errors are returned.
    pub async fn get_or_fill<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        if self.is_enabled() {
            match self.get::<T>(key).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "Cache read failed, fetching from source"),
            }
        }

        let value = fetch().await?;

        if self.is_enabled() {
            if let Err(e) = self.set(key, &value, ttl).await {
                warn!(key, error = %e, "Cache write failed");
            }
        }

        Ok(value)
    }
}

pub struct CachePipeline {
    conn: Option<ConnectionManager>,
    pipe: Pipeline,
    queued: usize,
}

impl CachePipeline {
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CoreResult<&mut Self> {
        let json = serde_json::to_string(value).map_err(|e| CoreError::Cache(e.to_string()))?;
        self.pipe
            .set_ex(key, json, ttl.as_secs().max(1))
            .ignore();
        self.queued += 1;
        Ok(self)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.queued
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.queued == 0
    }

    pub async fn exec(self) -> CoreResult<()> {
        let Some(mut conn) = self.conn else {
            return Ok(());
        };
        if self.queued == 0 {
            return Ok(());
        }
        self.pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
