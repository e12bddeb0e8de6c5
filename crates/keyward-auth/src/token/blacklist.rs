//! Credential revocation list.
//!
//! A revoked token gets its own key whose TTL is the token's remaining life,
//! so entries disappear on their own no later than the token would. The
//! per-user index set is bookkeeping for bulk listing and cleanup; the
//! per-token key is what `verify_access` consults.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use super::fingerprint;
use super::jwt::decode_unverified;
use crate::AuthResult;
use crate::error::AuthError;
use crate::store::{KeyValueStore, keys};

const SENTINEL: &[u8] = b"1";

/// Blacklist over a [`KeyValueStore`].
#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Revokes a token until its own `exp`.
    ///
    /// The user index is keyed by the token's `userId` claim when present.
    ///
    /// # Errors
    ///
    /// `InvalidTokenFormat` if the payload has no numeric `exp`, `Storage`
    /// if the blacklist key cannot be written.
    pub async fn add(&self, token: &str) -> AuthResult<()> {
        self.add_indexed(token, None).await
    }

    /// Revokes every token, indexing them under `user_id`.
    ///
    /// Per-token failures are logged and skipped. Returns how many were
    /// revoked.
    pub async fn add_all_for_user(&self, user_id: &str, tokens: &[String]) -> usize {
        let mut revoked = 0;
        for token in tokens {
            match self.add_indexed(token, Some(user_id)).await {
                Ok(()) => revoked += 1,
                Err(e) => tracing::warn!(
                    user_id = %user_id,
                    token = %fingerprint(token),
                    error = %e,
                    "Failed to blacklist token"
                ),
            }
        }
        revoked
    }

    async fn add_indexed(&self, token: &str, index_user: Option<&str>) -> AuthResult<()> {
        let payload = decode_unverified(token)
            .ok_or_else(|| AuthError::invalid_token_format("payload is not decodable"))?;
        let exp = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| AuthError::invalid_token_format("token has no exp claim"))?;

        let remaining = exp.saturating_sub(OffsetDateTime::now_utc().unix_timestamp());
        let ttl = Duration::from_secs(remaining.max(1) as u64);

        self.store
            .set_ex(&keys::blacklist(token), SENTINEL, ttl)
            .await?;

        let owner = index_user.or_else(|| payload.get("userId").and_then(|v| v.as_str()));
        if let Some(user_id) = owner
            && let Err(e) = self
                .store
                .set_add(&keys::blacklist_index(user_id), token)
                .await
        {
            tracing::warn!(
                user_id = %user_id,
                token = %fingerprint(token),
                error = %e,
                "Failed to index blacklisted token"
            );
        }

        tracing::debug!(token = %fingerprint(token), ttl_secs = ttl.as_secs(), "Token blacklisted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Storage` if the lookup fails.
    pub async fn contains(&self, token: &str) -> AuthResult<bool> {
        Ok(self.store.exists(&keys::blacklist(token)).await?)
    }

    /// Index members for a user. May include tokens whose entry has expired.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the index cannot be read.
    pub async fn tokens_for_user(&self, user_id: &str) -> AuthResult<Vec<String>> {
        Ok(self
            .store
            .set_members(&keys::blacklist_index(user_id))
            .await?)
    }

    /// Drops index members whose blacklist key is gone or has no expiry.
    ///
    /// Returns how many were dropped. Store failures are logged and end the
    /// sweep early.
    pub async fn cleanup_expired(&self, user_id: &str) -> usize {
        let index = keys::blacklist_index(user_id);
        let members = match self.store.set_members(&index).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to read blacklist index");
                return 0;
            }
        };

        let mut removed = 0;
        for token in members {
            let stale = match self.store.ttl(&keys::blacklist(&token)).await {
                Ok(ttl) => ttl.is_stale(),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Blacklist TTL probe failed");
                    break;
                }
            };
            if !stale {
                continue;
            }
            match self.store.set_remove(&index, &token).await {
                Ok(_) => removed += 1,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Failed to prune blacklist index");
                    break;
                }
            }
        }

        if removed > 0 {
            tracing::info!(user_id = %user_id, removed, "Pruned expired blacklist entries");
        }
        removed
    }
}
