//! Token service: the credential lifecycle.
//!
//! - Access credentials are self-contained and verified by signature, after
//!   a blacklist check
//! - Refresh credentials are also persisted; a refresh token is only valid
//!   while it byte-matches the stored value for its `(userId, sessionId)`
//! - Rotation swaps the stored value with compare-and-swap, so of two
//!   concurrent refreshes with the same token exactly one wins
//!
//! # Usage
//!
//! ```ignore
//! use keyward_auth::token::{AccessGrant, RefreshOptions, TokenService};
//!
//! let service = TokenService::new(&config.tokens, store)?;
//! let access = service.issue_access(&AccessGrant::new(user_id, session_id))?;
//! let refresh = service.issue_refresh(user_id, session_id).await?;
//!
//! let pair = service
//!     .refresh_tokens(&refresh, &grant, RefreshOptions::default())
//!     .await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use uuid::Uuid;

use super::blacklist::TokenBlacklist;
use super::claims::{
    AccessClaims, AccessGrant, RefreshClaims, RefreshOptions, TokenPair, TokenType,
    TokenVerification, VerificationFailure,
};
use super::fingerprint;
use super::jwt::{JwtService, decode_unverified};
use crate::AuthResult;
use crate::config::TokensConfig;
use crate::error::AuthError;
use crate::store::{KeyValueStore, keys};

/// Issues, verifies, rotates and revokes credentials.
pub struct TokenService {
    access: JwtService,
    refresh: JwtService,
    store: Arc<dyn KeyValueStore>,
    blacklist: TokenBlacklist,
}

impl TokenService {
    /// Creates the service.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if either class has an empty secret
    /// or an unparseable expiry.
    pub fn new(config: &TokensConfig, store: Arc<dyn KeyValueStore>) -> AuthResult<Self> {
        Ok(Self {
            access: JwtService::from_config(&config.access)?,
            refresh: JwtService::from_config(&config.refresh)?,
            blacklist: TokenBlacklist::new(Arc::clone(&store)),
            store,
        })
    }

    /// Lifetime of access credentials.
    #[must_use]
    pub fn access_expiry(&self) -> Duration {
        self.access.expiry()
    }

    /// Lifetime of refresh credentials, also their store TTL.
    #[must_use]
    pub fn refresh_expiry(&self) -> Duration {
        self.refresh.expiry()
    }

    // ------------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------------

    /// Signs an access credential for `grant`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CredentialCreation` if the grant has no user or
    /// session id, or if signing fails.
    pub fn issue_access(&self, grant: &AccessGrant) -> AuthResult<String> {
        if grant.user_id.is_empty() || grant.session_id.is_empty() {
            return Err(AuthError::credential_creation(
                "userId and sessionId are required",
            ));
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AccessClaims {
            user_id: grant.user_id.clone(),
            session_id: grant.session_id.clone(),
            roles: grant.roles.clone(),
            permissions: grant.permissions.clone(),
            user_data: grant.user_data.clone(),
            token_type: TokenType::Access,
            iat: now,
            exp: expires_at(now, self.access.expiry())
                .ok_or_else(|| AuthError::credential_creation("access lifetime out of range"))?,
            iss: self.access.issuer().map(str::to_string),
            aud: self.access.audience().map(str::to_string),
            jti: Uuid::new_v4().to_string(),
        };

        self.access
            .encode(&claims)
            .map_err(|e| AuthError::credential_creation(e.to_string()))
    }

    /// Signs a refresh credential and stores it for `(user_id, session_id)`,
    /// replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RefreshCreation` if signing or the store write
    /// fails. A token that was not stored is never returned.
    pub async fn issue_refresh(&self, user_id: &str, session_id: &str) -> AuthResult<String> {
        let token = self.sign_refresh(user_id, session_id)?;

        self.store
            .set_ex(
                &keys::refresh(user_id, session_id),
                token.as_bytes(),
                self.refresh.expiry(),
            )
            .await
            .map_err(|e| AuthError::refresh_creation(format!("store write failed: {e}")))?;

        tracing::debug!(
            user_id = %user_id,
            session_id = %session_id,
            token = %fingerprint(&token),
            "Refresh token issued"
        );
        Ok(token)
    }

    fn sign_refresh(&self, user_id: &str, session_id: &str) -> AuthResult<String> {
        if user_id.is_empty() || session_id.is_empty() {
            return Err(AuthError::refresh_creation(
                "userId and sessionId are required",
            ));
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = RefreshClaims {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp: expires_at(now, self.refresh.expiry())
                .ok_or_else(|| AuthError::refresh_creation("refresh lifetime out of range"))?,
            nonce: hex::encode(rand::random::<[u8; 16]>()),
        };

        self.refresh
            .encode(&claims)
            .map_err(|e| AuthError::refresh_creation(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------------

    /// Verifies an access credential.
    ///
    /// Checks run in order and stop at the first failure: blacklist,
    /// signature and time/issuer/audience claims, then `type`. A blacklist
    /// lookup error rejects the token. Safe on arbitrary input.
    pub async fn verify_access(&self, token: &str) -> TokenVerification<AccessClaims> {
        match self.blacklist.contains(token).await {
            Ok(true) => return TokenVerification::Invalid(VerificationFailure::Blacklisted),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    token = %fingerprint(token),
                    error = %e,
                    "Blacklist lookup failed; rejecting token"
                );
                return TokenVerification::Invalid(VerificationFailure::BlacklistLookupFailed);
            }
        }

        match typed_claims::<AccessClaims>(&self.access, token, TokenType::Access) {
            Ok(claims) => TokenVerification::Valid(claims),
            Err(failure) => TokenVerification::Invalid(failure),
        }
    }

    /// Verifies a refresh credential: signature, expiry and `type`, then
    /// byte-equality with the stored token for its `(userId, sessionId)`.
    pub async fn verify_refresh(&self, token: &str) -> TokenVerification<RefreshClaims> {
        let claims = match typed_claims::<RefreshClaims>(&self.refresh, token, TokenType::Refresh)
        {
            Ok(claims) => claims,
            Err(failure) => return TokenVerification::Invalid(failure),
        };

        let key = keys::refresh(&claims.user_id, &claims.session_id);
        match self.store.get(&key).await {
            Ok(Some(stored)) if stored == token.as_bytes() => TokenVerification::Valid(claims),
            Ok(_) => TokenVerification::Invalid(VerificationFailure::NotInStore),
            Err(e) => {
                tracing::warn!(
                    user_id = %claims.user_id,
                    session_id = %claims.session_id,
                    error = %e,
                    "Refresh token lookup failed"
                );
                TokenVerification::Invalid(VerificationFailure::StoreLookupFailed)
            }
        }
    }

    /// Reads a payload without verifying it. Not for trust decisions.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<serde_json::Value> {
        decode_unverified(token)
    }

    // ------------------------------------------------------------------------
    // Revocation
    // ------------------------------------------------------------------------

    /// Blacklists a token until it would expire anyway.
    ///
    /// # Errors
    ///
    /// `InvalidTokenFormat` if the token has no readable `exp`; `Storage` if
    /// the blacklist write fails.
    pub async fn blacklist(&self, token: &str) -> AuthResult<()> {
        self.blacklist.add(token).await
    }

    /// Blacklists each token; failures are logged and skipped. Returns how
    /// many were blacklisted.
    pub async fn blacklist_all_for_user(&self, user_id: &str, tokens: &[String]) -> usize {
        let revoked = self.blacklist.add_all_for_user(user_id, tokens).await;
        tracing::info!(
            user_id = %user_id,
            requested = tokens.len(),
            revoked,
            "Blacklisted tokens for user"
        );
        revoked
    }

    /// # Errors
    ///
    /// Returns `Storage` if the lookup fails.
    pub async fn is_blacklisted(&self, token: &str) -> AuthResult<bool> {
        self.blacklist.contains(token).await
    }

    /// Members of the user's blacklist index.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the index cannot be read.
    pub async fn blacklisted_tokens(&self, user_id: &str) -> AuthResult<Vec<String>> {
        self.blacklist.tokens_for_user(user_id).await
    }

    /// Prunes index entries whose blacklist key has lapsed. Returns the count.
    pub async fn cleanup_expired_blacklisted(&self, user_id: &str) -> usize {
        self.blacklist.cleanup_expired(user_id).await
    }

    /// Deletes the stored refresh token for a session. Returns `true` if one
    /// was stored.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the delete fails.
    pub async fn revoke_refresh(&self, user_id: &str, session_id: &str) -> AuthResult<bool> {
        let removed = self
            .store
            .delete(&keys::refresh(user_id, session_id))
            .await?;
        tracing::debug!(user_id = %user_id, session_id = %session_id, removed, "Refresh token revoked");
        Ok(removed)
    }

    /// Logout helper: revokes the session's refresh token and, if given,
    /// blacklists its access token.
    ///
    /// # Errors
    ///
    /// Propagates the first failure of either step.
    pub async fn revoke_session_tokens(
        &self,
        user_id: &str,
        session_id: &str,
        access_token: Option<&str>,
    ) -> AuthResult<()> {
        self.revoke_refresh(user_id, session_id).await?;
        if let Some(token) = access_token {
            self.blacklist(token).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Exchanges a refresh token for a new pair.
    ///
    /// The new access credential carries the roles, permissions and user
    /// data of `caller_asserted` as given; they are not re-resolved. Its
    /// `userId`/`sessionId` are taken from the verified refresh token.
    ///
    /// With `rotate`, the stored refresh token is replaced only if it still
    /// equals the presented one; a concurrent refresh that already rotated it
    /// makes this call return `None`. Without `rotate`, the presented token is
    /// returned unchanged.
    ///
    /// Any failure returns `None`; the caller should re-authenticate.
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        caller_asserted: &AccessGrant,
        options: RefreshOptions,
    ) -> Option<TokenPair> {
        let claims = match self.verify_refresh(refresh_token).await {
            TokenVerification::Valid(claims) => claims,
            TokenVerification::Invalid(failure) => {
                tracing::debug!(
                    token = %fingerprint(refresh_token),
                    reason = %failure,
                    "Refresh rejected"
                );
                return None;
            }
        };

        if caller_asserted.user_id != claims.user_id
            || caller_asserted.session_id != claims.session_id
        {
            tracing::warn!(
                token_user = %claims.user_id,
                asserted_user = %caller_asserted.user_id,
                "Asserted grant does not match refresh token; using token identity"
            );
        }
        let grant = AccessGrant {
            user_id: claims.user_id.clone(),
            session_id: claims.session_id.clone(),
            ..caller_asserted.clone()
        };

        let access_token = match self.issue_access(&grant) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(user_id = %claims.user_id, error = %e, "Access issuance failed during refresh");
                return None;
            }
        };

        if !options.rotate {
            return Some(TokenPair {
                access_token,
                refresh_token: refresh_token.to_string(),
            });
        }

        let rotated = match self.sign_refresh(&claims.user_id, &claims.session_id) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(user_id = %claims.user_id, error = %e, "Refresh issuance failed during rotation");
                return None;
            }
        };

        let key = keys::refresh(&claims.user_id, &claims.session_id);
        match self
            .store
            .compare_and_swap(
                &key,
                refresh_token.as_bytes(),
                rotated.as_bytes(),
                self.refresh.expiry(),
            )
            .await
        {
            Ok(true) => {
                tracing::debug!(
                    user_id = %claims.user_id,
                    session_id = %claims.session_id,
                    "Refresh token rotated"
                );
                Some(TokenPair {
                    access_token,
                    refresh_token: rotated,
                })
            }
            Ok(false) => {
                tracing::info!(
                    user_id = %claims.user_id,
                    session_id = %claims.session_id,
                    "Refresh token changed during rotation"
                );
                None
            }
            Err(e) => {
                tracing::warn!(user_id = %claims.user_id, error = %e, "Refresh rotation write failed");
                None
            }
        }
    }
}

/// `exp` claim for a credential issued at `now`, or `None` on overflow.
fn expires_at(now: i64, lifetime: Duration) -> Option<i64> {
    i64::try_from(lifetime.as_secs())
        .ok()
        .and_then(|secs| now.checked_add(secs))
}

/// Verifies `token` with `jwt`, checks its `type`, then reads the typed
/// claims. The type check precedes the typed read so that a valid token of
/// the other class reports `InvalidTokenType`.
fn typed_claims<C: DeserializeOwned>(
    jwt: &JwtService,
    token: &str,
    expected: TokenType,
) -> Result<C, VerificationFailure> {
    let payload: serde_json::Value = jwt.decode(token)?;

    if payload.get("type").and_then(|t| t.as_str()) != Some(expected.as_str()) {
        return Err(VerificationFailure::InvalidTokenType);
    }

    serde_json::from_value(payload).map_err(|e| VerificationFailure::Malformed(e.to_string()))
}
