//! Wiring of the token, session and role components over one store.

use std::sync::Arc;
use std::time::Duration;

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::gate::AuthGate;
use crate::rbac::RoleResolver;
use crate::session::SessionRegistry;
use crate::store::KeyValueStore;
use crate::token::TokenService;

/// What one [`Authority::cleanup`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired sessions destroyed.
    pub sessions: usize,
    /// Expired keys the store dropped.
    pub store_keys: usize,
    /// Expired role/permission cache entries.
    pub cache_entries: usize,
}

/// All components built from one [`AuthConfig`], sharing one store.
///
/// Construct it once per process; the resolver caches live inside it.
#[derive(Clone)]
pub struct Authority {
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionRegistry>,
    pub roles: Arc<RoleResolver>,
    pub gate: AuthGate,
    store: Arc<dyn KeyValueStore>,
}

impl Authority {
    /// Validates `config` and builds every component.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the config does not validate.
    pub fn new(config: &AuthConfig, store: Arc<dyn KeyValueStore>) -> AuthResult<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenService::new(&config.tokens, Arc::clone(&store))?);
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&store),
            config.session.clone(),
        ));
        let roles = Arc::new(RoleResolver::new(Arc::clone(&store), config.rbac.clone()));
        let gate = AuthGate::new(Arc::clone(&tokens), Arc::clone(&sessions));

        tracing::debug!(
            access_expiry_secs = tokens.access_expiry().as_secs(),
            refresh_expiry_secs = tokens.refresh_expiry().as_secs(),
            max_sessions = config.session.max_sessions,
            "Authority initialized"
        );

        Ok(Self {
            tokens,
            sessions,
            roles,
            gate,
            store,
        })
    }

    /// One maintenance pass: expired sessions, then keys the store has not
    /// dropped on its own, then resolver cache entries.
    ///
    /// Failures are logged and counted as zero.
    pub async fn cleanup(&self) -> CleanupReport {
        let sessions = self.sessions.cleanup_expired().await;
        let store_keys = self.store.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Store purge failed");
            0
        });
        let cache_entries = self.roles.cleanup_cache();

        CleanupReport {
            sessions,
            store_keys,
            cache_entries,
        }
    }

    /// Runs [`cleanup`](Self::cleanup) every `interval` until the handle is
    /// aborted.
    pub fn spawn_cleanup_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let authority = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                let report = authority.cleanup().await;
                tracing::debug!(
                    sessions = report.sessions,
                    store_keys = report.store_keys,
                    cache_entries = report.cache_entries,
                    "Cleanup completed"
                );
            }
        })
    }
}
