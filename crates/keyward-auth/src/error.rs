//! Authentication and authorization error types.
//!
//! Verification failures are not errors: `verify_access` and `verify_refresh`
//! report them as values (see [`crate::token::VerificationFailure`]). The
//! variants here are the failures that are surfaced to callers.

use std::fmt;

use crate::store::StoreError;

/// Errors that can occur during token, session and role operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The configuration is invalid (bad expiry string, missing secret, ...).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An access token could not be signed.
    #[error("Failed to create access token: {message}")]
    CredentialCreation {
        /// Description of the signing failure.
        message: String,
    },

    /// A refresh token could not be signed or persisted.
    #[error("Failed to create refresh token: {message}")]
    RefreshCreation {
        /// Description of the failure.
        message: String,
    },

    /// A token could not be decoded far enough to read a required claim.
    #[error("Invalid token format: {message}")]
    InvalidTokenFormat {
        /// Description of what was missing or malformed.
        message: String,
    },

    /// A session could not be created.
    #[error("Failed to create session: {message}")]
    SessionCreation {
        /// Description of the failure.
        message: String,
    },

    /// A role or permission mutation was rejected or failed.
    #[error("Role mutation failed: {message}")]
    RoleMutation {
        /// Description of the failure.
        message: String,
    },

    /// A requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity ("Role", "Permission", ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The request lacks valid authentication credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The authenticated user lacks a required role or permission.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// The key-value store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `CredentialCreation` error.
    #[must_use]
    pub fn credential_creation(message: impl Into<String>) -> Self {
        Self::CredentialCreation {
            message: message.into(),
        }
    }

    /// Creates a new `RefreshCreation` error.
    #[must_use]
    pub fn refresh_creation(message: impl Into<String>) -> Self {
        Self::RefreshCreation {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat {
            message: message.into(),
        }
    }

    /// Creates a new `SessionCreation` error.
    #[must_use]
    pub fn session_creation(message: impl Into<String>) -> Self {
        Self::SessionCreation {
            message: message.into(),
        }
    }

    /// Creates a new `RoleMutation` error.
    #[must_use]
    pub fn role_mutation(message: impl Into<String>) -> Self {
        Self::RoleMutation {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller caused this error (bad input, no access).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTokenFormat { .. }
                | Self::RoleMutation { .. }
                | Self::NotFound { .. }
                | Self::Unauthorized { .. }
                | Self::Forbidden { .. }
        )
    }

    /// Returns `true` if this is a server-side failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::CredentialCreation { .. }
                | Self::RefreshCreation { .. }
                | Self::SessionCreation { .. }
                | Self::Storage { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error happened while issuing a credential.
    #[must_use]
    pub fn is_issuance_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialCreation { .. } | Self::RefreshCreation { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::CredentialCreation { .. } => ErrorCategory::Token,
            Self::RefreshCreation { .. } => ErrorCategory::Token,
            Self::InvalidTokenFormat { .. } => ErrorCategory::Token,
            Self::SessionCreation { .. } => ErrorCategory::Session,
            Self::RoleMutation { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("Serialization failed: {err}"))
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification.
    Authentication,
    /// Role and permission checks or mutations.
    Authorization,
    /// Credential issuance and decoding.
    Token,
    /// Session lifecycle.
    Session,
    /// Input validation.
    Validation,
    /// Store failures.
    Infrastructure,
    /// Configuration problems.
    Configuration,
    /// Everything else.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Session => write!(f, "session"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
