//! Credential payloads and verification results.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::jwt::JwtError;

/// Discriminates the two credential classes inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an access credential asserts about its holder.
///
/// On refresh this is supplied by the caller and signed as-is; nothing here
/// is re-read from the role store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub user_id: String,
    pub session_id: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub user_data: Map<String, Value>,
}

impl AccessGrant {
    /// Grant with no roles, permissions or user data.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_user_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_data.insert(key.into(), value.into());
        self
    }
}

/// Access credential payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub user_id: String,
    pub session_id: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub user_data: Map<String, Value>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Unique credential id.
    pub jti: String,
}

impl AccessClaims {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// The grant this credential was issued from.
    #[must_use]
    pub fn grant(&self) -> AccessGrant {
        AccessGrant {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
            user_data: self.user_data.clone(),
        }
    }
}

/// Refresh credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub user_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    /// Random; only makes each issued token distinct.
    pub nonce: String,
}

/// Access and refresh credential returned by a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Options for [`TokenService::refresh_tokens`](super::TokenService::refresh_tokens).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Replace the stored refresh token with a new one.
    pub rotate: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self { rotate: true }
    }
}

impl RefreshOptions {
    /// Keep the presented refresh token.
    #[must_use]
    pub fn keep_refresh_token() -> Self {
        Self { rotate: false }
    }
}

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    Blacklisted,
    BlacklistLookupFailed,
    Expired,
    InvalidSignature,
    InvalidClaims(String),
    Malformed(String),
    InvalidTokenType,
    NotInStore,
    StoreLookupFailed,
}

impl VerificationFailure {
    /// Message handed back to callers.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blacklisted => f.write_str("Token is blacklisted"),
            Self::BlacklistLookupFailed => f.write_str("Blacklist lookup failed"),
            Self::Expired => f.write_str("Token expired"),
            Self::InvalidSignature => f.write_str("Invalid signature"),
            Self::InvalidClaims(message) => write!(f, "Invalid claims: {message}"),
            Self::Malformed(message) => write!(f, "Malformed token: {message}"),
            Self::InvalidTokenType => f.write_str("Invalid token type"),
            Self::NotInStore => f.write_str("Token not found in store"),
            Self::StoreLookupFailed => f.write_str("Refresh token lookup failed"),
        }
    }
}

impl From<JwtError> for VerificationFailure {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => Self::Expired,
            JwtError::InvalidSignature => Self::InvalidSignature,
            JwtError::InvalidClaims { message } => Self::InvalidClaims(message),
            JwtError::EncodingError { message } | JwtError::DecodingError { message } => {
                Self::Malformed(message)
            }
        }
    }
}

/// Outcome of verifying a credential. Rejection is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenVerification<C> {
    Valid(C),
    Invalid(VerificationFailure),
}

impl<C> TokenVerification<C> {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub fn claims(&self) -> Option<&C> {
        match self {
            Self::Valid(claims) => Some(claims),
            Self::Invalid(_) => None,
        }
    }

    #[must_use]
    pub fn into_claims(self) -> Option<C> {
        match self {
            Self::Valid(claims) => Some(claims),
            Self::Invalid(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&VerificationFailure> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(failure) => Some(failure),
        }
    }

    /// Rejection message, `None` when valid.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.failure().map(VerificationFailure::message)
    }

    pub fn into_result(self) -> Result<C, VerificationFailure> {
        match self {
            Self::Valid(claims) => Ok(claims),
            Self::Invalid(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_claims_wire_names() {
        let claims = AccessClaims {
            user_id: "u1".into(),
            session_id: "s1".into(),
            roles: BTreeSet::from(["admin".to_string()]),
            permissions: BTreeSet::new(),
            user_data: Map::new(),
            token_type: TokenType::Access,
            iat: 1,
            exp: 2,
            iss: None,
            aud: None,
            jti: "j".into(),
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["type"], "access");
        assert!(value.get("iss").is_none());
        assert_eq!(value["userData"], json!({}));
    }

    #[test]
    fn test_grant_builder() {
        let grant = AccessGrant::new("u1", "s1")
            .with_roles(["user", "admin"])
            .with_permissions(["users:read"])
            .with_user_data("email", "a@example.com");
        assert!(grant.roles.contains("admin"));
        assert_eq!(grant.user_data["email"], "a@example.com");
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            VerificationFailure::Blacklisted.to_string(),
            "Token is blacklisted"
        );
        assert!(VerificationFailure::Expired.message().contains("expired"));
        assert_eq!(
            VerificationFailure::NotInStore.to_string(),
            "Token not found in store"
        );
        assert_eq!(
            VerificationFailure::from(JwtError::decoding_error("bad base64")).to_string(),
            "Malformed token: bad base64"
        );
    }

    #[test]
    fn test_verification_accessors() {
        let ok: TokenVerification<u8> = TokenVerification::Valid(1);
        assert!(ok.is_valid());
        assert_eq!(ok.error(), None);
        assert_eq!(ok.into_claims(), Some(1));

        let bad: TokenVerification<u8> =
            TokenVerification::Invalid(VerificationFailure::InvalidTokenType);
        assert!(!bad.is_valid());
        assert_eq!(bad.error().as_deref(), Some("Invalid token type"));
        assert_eq!(
            bad.into_result().unwrap_err(),
            VerificationFailure::InvalidTokenType
        );
    }

    #[test]
    fn test_refresh_options_default_rotates() {
        assert!(RefreshOptions::default().rotate);
        assert!(!RefreshOptions::keep_refresh_token().rotate);
    }
}
