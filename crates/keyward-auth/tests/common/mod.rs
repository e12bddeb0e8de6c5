//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keyward_auth::store::{KeyTtl, KeyValueStore, MemoryStore, StoreError, StoreResult};
use keyward_auth::{AuthConfig, Authority};

/// A [`MemoryStore`] whose reads or writes can be made to fail on demand.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_writes_under: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Fails only writes to keys starting with `prefix`.
    pub fn fail_writes_under(&self, prefix: Option<&str>) {
        if let Ok(mut slot) = self.fail_writes_under.lock() {
            *slot = prefix.map(str::to_string);
        }
    }

    fn read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected read failure".into()));
        }
        Ok(())
    }

    fn write(&self, key: &str) -> StoreResult<()> {
        let under = self
            .fail_writes_under
            .lock()
            .is_ok_and(|slot| slot.as_deref().is_some_and(|p| key.starts_with(p)));
        if under || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.write(key)?;
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.write(key)?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.read()?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.read()?;
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.read()?;
        self.inner.keys(pattern).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.read()?;
        self.inner.set_members(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.read()?;
        self.inner.hash_get(key, field).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.write(key)?;
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.hash_delete(key, field).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.write(key)?;
        self.inner.compare_and_swap(key, expected, value, ttl).await
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.inner.purge_expired().await
    }
}

pub fn test_config() -> AuthConfig {
    AuthConfig::with_secrets("access-secret-for-tests", "refresh-secret-for-tests")
}

/// An [`Authority`] over a fresh in-memory store.
pub fn authority() -> Authority {
    authority_with(test_config())
}

pub fn authority_with(config: AuthConfig) -> Authority {
    Authority::new(&config, Arc::new(MemoryStore::new())).expect("valid test config")
}

/// An [`Authority`] plus a handle for injecting store failures.
pub fn faulty_authority() -> (Authority, Arc<FaultyStore>) {
    let store = FaultyStore::new();
    let authority = Authority::new(&test_config(), store.clone()).expect("valid test config");
    (authority, store)
}
