//! Session registry.
//!
//! Session records and the per-user session list live under separate keys
//! and are written one after the other, so they can disagree: a list may
//! name a session whose record already expired, and a record may exist that
//! no list names. Readers skip what they cannot load.
//!
//! Only [`SessionRegistry::create`] surfaces failures. Reads, renewals,
//! destruction, event tracking and cleanup log and carry on.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{AuthEvent, AuthEventType, Session};
use crate::AuthResult;
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::store::{KeyValueStore, StoreResult, get_json, keys, set_json_ex};

/// Auth events are kept for a day.
pub const EVENT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Creates, renews, lists and destroys sessions.
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    last_event_millis: AtomicI64,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            last_event_millis: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts a session for `user_id`.
    ///
    /// Writes the record, appends it to the user's list and evicts the
    /// oldest sessions beyond `max_sessions`, then records a `login` event.
    /// Device fields are dropped unless device tracking is on.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SessionCreation` if the record or the list cannot
    /// be written.
    pub async fn create(
        &self,
        user_id: &str,
        device_info: Option<Map<String, Value>>,
        device_id: Option<String>,
    ) -> AuthResult<Session> {
        let now = OffsetDateTime::now_utc();
        let (device_id, device_info) = if self.config.track_devices {
            (device_id, device_info)
        } else {
            (None, None)
        };

        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id,
            device_info,
            created_at: now,
            last_active_at: now,
            expires_at: now + self.config.ttl,
            is_active: true,
        };

        set_json_ex(
            self.store.as_ref(),
            &keys::session(&session.session_id),
            &session,
            self.config.ttl,
        )
        .await
        .map_err(|e| AuthError::session_creation(format!("record write failed: {e}")))?;

        let evicted = self
            .append_to_user_list(user_id, &session.session_id)
            .await
            .map_err(|e| AuthError::session_creation(format!("session list update failed: {e}")))?;

        for old_id in &evicted {
            self.remove_record(old_id, user_id, AuthEventType::SessionRevoked)
                .await;
        }

        self.track_event(
            AuthEvent::new(user_id, AuthEventType::Login).with_session(&session.session_id),
        )
        .await;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.session_id,
            evicted = evicted.len(),
            "Session created"
        );
        Ok(session)
    }

    /// Appends `session_id` and trims the list to `max_sessions`, oldest
    /// first. Returns the ids that were dropped.
    async fn append_to_user_list(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> AuthResult<Vec<String>> {
        let key = keys::user_sessions(user_id);
        let mut ids: Vec<String> = get_json(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default();
        ids.push(session_id.to_string());

        let excess = ids.len().saturating_sub(self.config.max_sessions);
        let evicted: Vec<String> = ids.drain(..excess).collect();

        set_json_ex(self.store.as_ref(), &key, &ids, self.config.ttl).await?;
        Ok(evicted)
    }

    /// Loads a live session.
    ///
    /// An expired session is destroyed and reported as absent. With rolling
    /// renewal on, the returned session has already been extended.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let (raw, mut session) = self.load_raw(session_id).await?;

        if session.is_expired() {
            self.remove_record(session_id, &session.user_id, AuthEventType::SessionExpired)
                .await;
            self.remove_from_user_list(&session.user_id, session_id)
                .await;
            return None;
        }

        if self.config.rolling && !self.renew(&raw, &mut session).await {
            // Destroyed or renewed by someone else since the read.
            return self
                .load(session_id)
                .await
                .filter(|current| !current.is_expired());
        }
        Some(session)
    }

    /// `true` if the session exists and has not expired. Never renews.
    pub async fn is_valid(&self, session_id: &str) -> bool {
        self.load(session_id)
            .await
            .is_some_and(|session| !session.is_expired())
    }

    /// Extends a live session by the configured TTL. Returns `false` if it
    /// is gone, expired, or could not be rewritten.
    pub async fn touch(&self, session_id: &str) -> bool {
        match self.load_raw(session_id).await {
            Some((raw, mut session)) if !session.is_expired() => {
                self.renew(&raw, &mut session).await
            }
            _ => false,
        }
    }

    /// Rewrites the record only if it still holds `current`, so a session
    /// destroyed after the read stays destroyed.
    async fn renew(&self, current: &[u8], session: &mut Session) -> bool {
        let now = OffsetDateTime::now_utc();
        session.last_active_at = now;
        session.expires_at = now + self.config.ttl;

        let renewed = match serde_json::to_vec(&*session) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "Session renewal failed");
                return false;
            }
        };
        match self
            .store
            .compare_and_swap(
                &keys::session(&session.session_id),
                current,
                &renewed,
                self.config.ttl,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(session_id = %session.session_id, "Session changed during renewal");
                return false;
            }
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "Session renewal failed");
                return false;
            }
        }

        if let Err(e) = self
            .store
            .expire(&keys::user_sessions(&session.user_id), self.config.ttl)
            .await
        {
            tracing::warn!(user_id = %session.user_id, error = %e, "Session list renewal failed");
        }
        true
    }

    /// Ends a session and records a `logout` event. Returns `false` if
    /// there was no such session.
    pub async fn destroy(&self, session_id: &str) -> bool {
        self.destroy_with(session_id, AuthEventType::Logout).await
    }

    async fn destroy_with(&self, session_id: &str, reason: AuthEventType) -> bool {
        let Some(session) = self.load(session_id).await else {
            // A record we cannot read may still be there.
            if let Err(e) = self.store.delete(&keys::session(session_id)).await {
                tracing::warn!(session_id = %session_id, error = %e, "Session delete failed");
            }
            return false;
        };

        self.remove_record(session_id, &session.user_id, reason)
            .await;
        self.remove_from_user_list(&session.user_id, session_id)
            .await;
        true
    }

    /// Deletes the record and records `reason`. Leaves the user list alone.
    async fn remove_record(&self, session_id: &str, user_id: &str, reason: AuthEventType) {
        if let Err(e) = self.store.delete(&keys::session(session_id)).await {
            tracing::warn!(session_id = %session_id, error = %e, "Session delete failed");
        }
        self.track_event(AuthEvent::new(user_id, reason).with_session(session_id))
            .await;
        tracing::debug!(user_id = %user_id, session_id = %session_id, reason = %reason, "Session destroyed");
    }

    async fn remove_from_user_list(&self, user_id: &str, session_id: &str) {
        if let Err(e) = self.try_remove_from_user_list(user_id, session_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Session list update failed");
        }
    }

    async fn try_remove_from_user_list(&self, user_id: &str, session_id: &str) -> StoreResult<()> {
        let key = keys::user_sessions(user_id);
        let ids: Vec<String> = get_json(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default();
        let remaining: Vec<&String> = ids.iter().filter(|id| *id != session_id).collect();

        if remaining.len() == ids.len() {
            Ok(())
        } else if remaining.is_empty() {
            self.store.delete(&key).await.map(|_| ())
        } else {
            set_json_ex(self.store.as_ref(), &key, &remaining, self.config.ttl).await
        }
    }

    /// Live sessions of a user in creation order. Missing or expired
    /// entries in the list are skipped.
    pub async fn user_sessions(&self, user_id: &str) -> Vec<Session> {
        let mut sessions = Vec::new();
        for id in self.user_session_ids(user_id).await {
            if let Some(session) = self.load(&id).await
                && !session.is_expired()
            {
                sessions.push(session);
            }
        }
        sessions
    }

    /// Number of live sessions a user has.
    pub async fn session_count(&self, user_id: &str) -> usize {
        self.user_sessions(user_id).await.len()
    }

    /// Raw list of session ids for a user, possibly including dead ones.
    pub async fn user_session_ids(&self, user_id: &str) -> Vec<String> {
        match get_json::<Vec<String>>(self.store.as_ref(), &keys::user_sessions(user_id)).await {
            Ok(ids) => ids.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to read session list");
                Vec::new()
            }
        }
    }

    /// Destroys all of a user's sessions except `except`. Returns how many
    /// were destroyed.
    pub async fn destroy_all_user_sessions(&self, user_id: &str, except: Option<&str>) -> usize {
        let ids = self.user_session_ids(user_id).await;
        let mut destroyed = 0;
        let mut kept = false;

        for id in &ids {
            if Some(id.as_str()) == except {
                kept = true;
                continue;
            }
            self.remove_record(id, user_id, AuthEventType::SessionRevoked)
                .await;
            destroyed += 1;
        }

        let key = keys::user_sessions(user_id);
        let result = match except {
            Some(keep) if kept => {
                set_json_ex(self.store.as_ref(), &key, &[keep], self.config.ttl).await
            }
            _ => self.store.delete(&key).await.map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!(user_id = %user_id, error = %e, "Session list update failed");
        }

        tracing::info!(user_id = %user_id, destroyed, "Destroyed user sessions");
        destroyed
    }

    /// Records an auth event. No-op when event logging is off.
    pub async fn track_event(&self, event: AuthEvent) {
        if !self.config.log_events {
            return;
        }

        let key = keys::auth_event(&event.user_id, self.next_event_millis(&event));
        if let Err(e) = set_json_ex(self.store.as_ref(), &key, &event, EVENT_TTL).await {
            tracing::warn!(
                user_id = %event.user_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to record auth event"
            );
        }
    }

    /// Millisecond key suffix, strictly increasing within this process so
    /// events recorded in the same millisecond do not overwrite each other.
    fn next_event_millis(&self, event: &AuthEvent) -> i128 {
        let wanted = (event.timestamp.unix_timestamp_nanos() / 1_000_000) as i64;
        let mut current = self.last_event_millis.load(Ordering::Relaxed);
        loop {
            let next = wanted.max(current + 1);
            match self.last_event_millis.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return i128::from(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Most recent events for a user, newest first.
    pub async fn user_events(&self, user_id: &str, limit: usize) -> Vec<AuthEvent> {
        let found = match self.store.keys(&keys::auth_event_pattern(user_id)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to list auth events");
                return Vec::new();
            }
        };
        let mut event_keys: Vec<(i128, String)> = found
            .into_iter()
            .filter_map(|key| Some((keys::event_timestamp(user_id, &key)?, key)))
            .collect();
        event_keys.sort_by_key(|(millis, _)| std::cmp::Reverse(*millis));

        let mut events = Vec::with_capacity(limit.min(event_keys.len()));
        for (_, key) in event_keys {
            if events.len() >= limit {
                break;
            }
            match get_json::<AuthEvent>(self.store.as_ref(), &key).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable auth event"),
            }
        }
        events
    }

    /// Destroys every expired session in the store. Returns the count.
    ///
    /// Scans the whole session keyspace; run it periodically, not per
    /// request.
    pub async fn cleanup_expired(&self) -> usize {
        let session_keys = match self.store.keys(keys::SESSION_PATTERN).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Session scan failed");
                return 0;
            }
        };

        let mut cleaned = 0;
        for key in session_keys {
            if key.starts_with(keys::USER_SESSIONS_PREFIX) {
                continue;
            }
            let session = match get_json::<Session>(self.store.as_ref(), &key).await {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable session");
                    continue;
                }
            };
            if session.is_expired()
                && self
                    .destroy_with(&session.session_id, AuthEventType::SessionExpired)
                    .await
            {
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "Cleaned up expired sessions");
        }
        cleaned
    }

    async fn load(&self, session_id: &str) -> Option<Session> {
        match get_json::<Session>(self.store.as_ref(), &keys::session(session_id)).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// Like `load`, also returning the stored bytes for a later CAS.
    async fn load_raw(&self, session_id: &str) -> Option<(Vec<u8>, Session)> {
        let raw = match self.store.get(&keys::session(session_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(session) => Some((raw, session)),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session record unreadable");
                None
            }
        }
    }
}
