//! Per-request authentication without a web framework.
//!
//! [`AuthGate::authenticate`] turns an `Authorization` header value into an
//! [`AuthContext`]:
//! 1. Extracts the `Bearer` credential
//! 2. Verifies it as an access token
//! 3. Loads its session and checks it belongs to the token's user
//!
//! Role and permission requirements are checked against the token's claims
//! snapshot, not against the live role store.

use std::sync::Arc;

use crate::AuthResult;
use crate::error::AuthError;
use crate::session::{Session, SessionRegistry};
use crate::token::{AccessClaims, TokenService, TokenVerification};

/// An authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: AccessClaims,
    pub session: Session,
}

impl AuthContext {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.claims.user_id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.claims.has_role(role)
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.claims.has_permission(permission)
    }

    #[must_use]
    pub fn has_all_permissions(&self, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(p))
    }
}

/// Verifies bearer credentials and their sessions.
#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<TokenService>,
    sessions: Arc<SessionRegistry>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenService>, sessions: Arc<SessionRegistry>) -> Self {
        Self { tokens, sessions }
    }

    /// Authenticates a request from its `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` if the header is missing or not a
    /// bearer credential, the credential does not verify, or its session is
    /// gone or belongs to another user.
    pub async fn authenticate(&self, authorization: Option<&str>) -> AuthResult<AuthContext> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or_else(|| AuthError::unauthorized("Missing or malformed bearer token"))?;

        let claims = match self.tokens.verify_access(token).await {
            TokenVerification::Valid(claims) => claims,
            TokenVerification::Invalid(failure) => {
                tracing::debug!(reason = %failure, "Bearer token rejected");
                return Err(AuthError::unauthorized(failure.message()));
            }
        };

        let session = self
            .sessions
            .get(&claims.session_id)
            .await
            .ok_or_else(|| AuthError::unauthorized("Session not found or expired"))?;

        if session.user_id != claims.user_id {
            tracing::warn!(
                token_user = %claims.user_id,
                session_user = %session.user_id,
                session_id = %session.session_id,
                "Token and session belong to different users"
            );
            return Err(AuthError::unauthorized("Session does not belong to token subject"));
        }

        Ok(AuthContext { claims, session })
    }

    /// Requires at least one of `any_of`. An empty list always passes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Forbidden` naming the required roles.
    pub fn require_roles(&self, ctx: &AuthContext, any_of: &[&str]) -> AuthResult<()> {
        if any_of.is_empty() || ctx.has_any_role(any_of) {
            return Ok(());
        }
        Err(AuthError::forbidden(format!(
            "requires one of roles: {}",
            any_of.join(", ")
        )))
    }

    /// Requires every permission in `all_of`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Forbidden` naming the missing permissions.
    pub fn require_permissions(&self, ctx: &AuthContext, all_of: &[&str]) -> AuthResult<()> {
        let missing: Vec<&str> = all_of
            .iter()
            .copied()
            .filter(|p| !ctx.has_permission(p))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(AuthError::forbidden(format!(
            "missing permissions: {}",
            missing.join(", ")
        )))
    }
}

/// Extracts the credential from `Bearer <token>`. The scheme is matched
/// case-insensitively.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty() && !token.contains(' ')).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  abc"), Some("abc"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }
}
