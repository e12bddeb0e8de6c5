//! Key-value store adapter.
//!
//! Everything the authority persists goes through [`KeyValueStore`]. The
//! contract is deliberately small: byte-string values with optional TTL,
//! string sets, string hashes, pattern scans and a single compare-and-swap
//! used to close the refresh rotation race. Each call is atomic on its own;
//! there are no cross-key transactions and callers must not assume any.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - in-process, DashMap-backed, lazy TTL expiry
//! - `keyward-store-redis` - Redis via a `deadpool-redis` pool

pub mod keys;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use memory::MemoryStore;

/// Errors reported by a store backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the command.
    #[error("store backend error: {0}")]
    Backend(String),

    /// No connection to the backend could be obtained.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The key holds a value of a different kind than the command expects.
    #[error("wrong value type for key '{key}'")]
    WrongType {
        /// The offending key.
        key: String,
    },

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a TTL probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists without an expiry.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// `true` when the probe says "absent or no expiry".
    ///
    /// Blacklist index entries pointing at such keys are stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Missing | Self::Persistent)
    }
}

/// Storage operations required by the token, session and role components.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a byte-string value.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a byte-string value without expiry.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Writes a byte-string value that expires after `ttl`.
    ///
    /// Backends with whole-second resolution round sub-second TTLs up to one
    /// second.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Deletes a key of any kind. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Returns `true` if the key exists and has not expired.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Resets the TTL of an existing key. Returns `false` if it is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Probes the remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Lists keys matching a glob pattern (`*` and `?` wildcards).
    ///
    /// This is a full keyspace scan; use it only from maintenance paths.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Adds a member to a set. Returns `true` if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Removes a member from a set. Returns `true` if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Returns all members of a set (empty when the key is absent).
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Reads a hash field.
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Writes a hash field.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Deletes a hash field. Returns `true` if it existed.
    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Replaces the value at `key` with `value` (and a fresh `ttl`) only if it
    /// currently equals `expected`. Returns `true` if the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Drops expired keys that nobody has read since they expired. Returns
    /// how many were removed.
    ///
    /// Backends with native expiry keep the default no-op.
    async fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Reads and deserializes a JSON record.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

/// Serializes a record as JSON and writes it with a TTL.
pub async fn set_json_ex<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> StoreResult<()> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(format!("{key}: {e}")))?;
    store.set_ex(key, &bytes, ttl).await
}

/// Serializes a record as JSON and writes it without expiry.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(format!("{key}: {e}")))?;
    store.set(key, &bytes).await
}
