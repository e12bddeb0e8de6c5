//! [`KeyValueStore`] over a deadpool Redis pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use keyward_auth::store::{KeyTtl, KeyValueStore, StoreResult};
use redis::AsyncCommands;

use crate::config::RedisStoreConfig;
use crate::{RedisSetupError, map_pool_error, map_redis_error};

/// Keys scanned per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Swaps `KEYS[1]` to `ARGV[2]` with a `ARGV[3]` ms TTL if it equals `ARGV[1]`.
const COMPARE_AND_SWAP: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
";

/// Redis-backed store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    cas: redis::Script,
}

impl RedisStore {
    /// Builds the pool and checks the server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or the server is
    /// unreachable.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, RedisSetupError> {
        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let pool = config.pool_config().create_pool(Some(Runtime::Tokio1))?;
        let store = Self::from_pool(pool);

        let mut conn = store
            .pool
            .get()
            .await
            .map_err(|e| RedisSetupError::Unreachable(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisSetupError::Unreachable(e.to_string()))?;

        tracing::info!("Connected to Redis");
        Ok(store)
    }

    /// Wraps an existing pool without checking connectivity.
    #[must_use]
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            cas: redis::Script::new(COMPARE_AND_SWAP),
        }
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(map_pool_error)
    }
}

/// Milliseconds for `PX`/`PEXPIRE`; zero would be rejected by the server.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| map_redis_error(key, e))
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.set(key, value).await.map_err(|e| map_redis_error(key, e))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await.map_err(|e| map_redis_error(key, e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(|e| map_redis_error(key, e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn().await?;
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(match millis {
            -2 => KeyTtl::Missing,
            ms if ms < 0 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.unsigned_abs())),
        })
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(pattern, e))?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.smembers(key).await.map_err(|e| map_redis_error(key, e))
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.hget(key, field)
            .await
            .map_err(|e| map_redis_error(key, e))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.hset(key, field, value)
            .await
            .map_err(|e| map_redis_error(key, e))
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .hdel(key, field)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(removed > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let swapped: i64 = self
            .cas
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        Ok(swapped == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
