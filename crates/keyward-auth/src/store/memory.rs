//! In-process key-value store.
//!
//! Single-instance backend built on `DashMap`. Expiry is lazy: an expired
//! entry is treated as absent on access and removed on the spot, and
//! [`KeyValueStore::purge_expired`] sweeps the rest. Semantics follow
//! Redis where it matters to callers: removing the last member of a set or
//! field of a hash deletes the key, and set/hash mutations keep an existing
//! TTL.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;

use super::{KeyTtl, KeyValueStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn persistent(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expiring(value: StoredValue, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// `None` (no expiry) when `ttl` is too far out for `Instant`.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// DashMap-backed [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `f` against the live value at `key`, dropping it if expired.
    fn with_live<R>(&self, key: &str, f: impl FnOnce(&StoredEntry) -> R) -> Option<R> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(f(&entry)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

/// Translates a Redis-style glob into an anchored regex.
///
/// Supports `*`, `?` and backslash escapes. Brackets are matched literally.
fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut buf = [0u8; 4];
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => source.push_str("(?s:.*)"),
            '?' => source.push_str("(?s:.)"),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                source.push_str(&regex::escape(literal.encode_utf8(&mut buf)));
            }
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| StoreError::Backend(format!("bad key pattern: {e}")))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.with_live(key, |entry| entry.value.clone()) {
            Some(StoredValue::Bytes(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry::persistent(StoredValue::Bytes(value.to_vec())),
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry::expiring(StoredValue::Bytes(value.to_vec()), ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_live(key, |_| ()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            return Ok(false);
        };
        if occupied.get().is_expired() {
            occupied.remove();
            return Ok(false);
        }
        occupied.get_mut().expires_at = deadline(ttl);
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        Ok(self
            .with_live(key, |entry| match entry.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
                None => KeyTtl::Persistent,
            })
            .unwrap_or(KeyTtl::Missing))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired() && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredEntry::persistent(StoredValue::Set(HashSet::from([
                        member.to_string(),
                    ]))));
                    return Ok(true);
                }
                match &mut occupied.get_mut().value {
                    StoredValue::Set(members) => Ok(members.insert(member.to_string())),
                    _ => Err(wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::persistent(StoredValue::Set(HashSet::from([
                    member.to_string(),
                ]))));
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            return Ok(false);
        };
        if occupied.get().is_expired() {
            occupied.remove();
            return Ok(false);
        }
        let (removed, now_empty) = match &mut occupied.get_mut().value {
            StoredValue::Set(members) => (members.remove(member), members.is_empty()),
            _ => return Err(wrong_type(key)),
        };
        if now_empty {
            occupied.remove();
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.with_live(key, |entry| entry.value.clone()) {
            Some(StoredValue::Set(members)) => Ok(members.into_iter().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.with_live(key, |entry| match &entry.value {
            StoredValue::Hash(fields) => Ok(fields.get(field).cloned()),
            _ => Err(wrong_type(key)),
        }) {
            Some(result) => result,
            None => Ok(None),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredEntry::persistent(StoredValue::Hash(HashMap::from([
                        (field.to_string(), value.to_string()),
                    ]))));
                    return Ok(());
                }
                match &mut occupied.get_mut().value {
                    StoredValue::Hash(fields) => {
                        fields.insert(field.to_string(), value.to_string());
                        Ok(())
                    }
                    _ => Err(wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::persistent(StoredValue::Hash(HashMap::from([(
                    field.to_string(),
                    value.to_string(),
                )]))));
                Ok(())
            }
        }
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            return Ok(false);
        };
        if occupied.get().is_expired() {
            occupied.remove();
            return Ok(false);
        }
        let (removed, now_empty) = match &mut occupied.get_mut().value {
            StoredValue::Hash(fields) => (fields.remove(field).is_some(), fields.is_empty()),
            _ => return Err(wrong_type(key)),
        };
        if now_empty {
            occupied.remove();
        }
        Ok(removed)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            return Ok(false);
        };
        if occupied.get().is_expired() {
            occupied.remove();
            return Ok(false);
        }
        match &occupied.get().value {
            StoredValue::Bytes(current) if current.as_slice() == expected => {
                occupied.insert(StoredEntry::expiring(
                    StoredValue::Bytes(value.to_vec()),
                    ttl,
                ));
                Ok(true)
            }
            StoredValue::Bytes(_) => Ok(false),
            _ => Err(wrong_type(key)),
        }
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired();
            removed += usize::from(expired);
            !expired
        });
        Ok(removed)
    }
}
