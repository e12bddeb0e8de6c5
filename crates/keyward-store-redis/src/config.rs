//! Pool settings.

use std::time::Duration;

use keyward_auth::config::StoreConfig;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Connection URL (`redis://host:port/db`).
    pub url: String,

    /// Maximum pooled connections.
    pub pool_size: usize,

    /// Applied to pool wait, create and recycle.
    pub timeout: Duration,
}

impl RedisStoreConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn pool_config(&self) -> deadpool_redis::Config {
        let mut config = deadpool_redis::Config::from_url(&self.url);
        let pool = config.pool.get_or_insert_with(Default::default);
        pool.max_size = self.pool_size;
        pool.timeouts.wait = Some(self.timeout);
        pool.timeouts.create = Some(self.timeout);
        pool.timeouts.recycle = Some(self.timeout);
        config
    }
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&StoreConfig> for RedisStoreConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            url: config.redis_url.clone(),
            pool_size: config.pool_size,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_store_config() {
        let store = StoreConfig {
            redis_url: "redis://cache:6380/2".to_string(),
            pool_size: 4,
            timeout_ms: 250,
            ..StoreConfig::default()
        };
        let config = RedisStoreConfig::from(&store);
        assert_eq!(config.url, "redis://cache:6380/2");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_pool_config_applies_limits() {
        let config = RedisStoreConfig::new("redis://localhost")
            .with_pool_size(3)
            .with_timeout(Duration::from_secs(1));
        let pool = config.pool_config().pool.unwrap();
        assert_eq!(pool.max_size, 3);
        assert_eq!(pool.timeouts.wait, Some(Duration::from_secs(1)));
    }
}
