//! Redis store backend for keyward-auth
//!
//! Implements [`KeyValueStore`](keyward_auth::store::KeyValueStore) on a
//! pooled Redis connection so that several processes can share credentials,
//! sessions and role data.
//!
//! Values are written with millisecond TTLs (`PX`, `PEXPIRE`), so sub-second
//! lifetimes are kept exactly. Compare-and-swap runs as a Lua script and is
//! atomic on the server.
//!
//! # Example
//!
//! ```ignore
//! use keyward_store_redis::{RedisStore, RedisStoreConfig};
//!
//! let store = RedisStore::connect(&RedisStoreConfig::new("redis://127.0.0.1:6379")).await?;
//! let authority = keyward_auth::Authority::new(&config, std::sync::Arc::new(store))?;
//! ```

pub mod config;
pub mod store;

pub use config::RedisStoreConfig;
pub use store::RedisStore;

use keyward_auth::store::StoreError;

/// Errors raised while setting up the pool.
#[derive(Debug, thiserror::Error)]
pub enum RedisSetupError {
    /// The pool could not be built from the configuration.
    #[error("Failed to create Redis pool: {0}")]
    Pool(#[from] deadpool_redis::CreatePoolError),

    /// The server did not answer the startup ping.
    #[error("Redis is unreachable: {0}")]
    Unreachable(String),
}

impl From<RedisSetupError> for StoreError {
    fn from(err: RedisSetupError) -> Self {
        StoreError::Connection(err.to_string())
    }
}

/// Maps a command failure to a store error.
pub(crate) fn map_redis_error(key: &str, err: redis::RedisError) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        return StoreError::WrongType {
            key: key.to_string(),
        };
    }
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        return StoreError::Connection(err.to_string());
    }
    StoreError::Backend(err.to_string())
}

/// Maps a pool checkout failure to a store error.
pub(crate) fn map_pool_error(err: deadpool_redis::PoolError) -> StoreError {
    StoreError::Connection(err.to_string())
}
