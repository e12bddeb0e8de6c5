//! # keyward-auth
//!
//! Token and session lifecycle authority.
//!
//! This crate provides:
//! - Signed access credentials and stored, rotating refresh credentials
//! - A credential blacklist that expires with the credentials it holds
//! - Sessions with a per-user cap, rolling renewal and an auth event log
//! - Roles and permissions with cached resolution
//! - A framework-free bearer authentication gate
//!
//! ## Overview
//!
//! Everything is persisted through the [`store::KeyValueStore`] trait. The
//! crate ships an in-process [`store::MemoryStore`]; `keyward-store-redis`
//! provides a Redis-backed one. Access credentials carry a snapshot of the
//! holder's roles and permissions taken at issuance; the session registry
//! tracks validity separately, and the role resolver is only consulted when
//! a caller asks for a fresh lookup.
//!
//! ## Modules
//!
//! - [`config`] - Configuration structs and validation
//! - [`store`] - Key-value store trait, key layout and in-memory backend
//! - [`cache`] - TTL caches injected into the role resolver
//! - [`token`] - Credential issuance, verification, rotation, revocation
//! - [`session`] - Session registry and auth events
//! - [`rbac`] - Roles, permissions and memberships
//! - [`gate`] - Per-request authentication and requirement checks
//! - [`authority`] - Builds all of the above from one config

pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod rbac;
pub mod session;
pub mod store;
pub mod token;

pub use authority::{Authority, CleanupReport};
pub use cache::{CacheStats, LocalTimedCache, NoOpCache, TimedCache};
pub use config::{
    AuthConfig, ConfigError, CredentialClassConfig, RbacConfig, SessionConfig, StoreBackend,
    StoreConfig, TokensConfig, parse_expiry,
};
pub use error::{AuthError, ErrorCategory};
pub use gate::{AuthContext, AuthGate};
pub use rbac::{
    CreateRole, MembershipRelation, NewPermission, Permission, ReconcileReport, Role,
    RoleResolver, SeedReport, UpdateRole,
};
pub use session::{AuthEvent, AuthEventType, Session, SessionRegistry};
pub use store::{KeyTtl, KeyValueStore, MemoryStore, StoreError, StoreResult};
pub use token::{
    AccessClaims, AccessGrant, RefreshClaims, RefreshOptions, SigningAlgorithm, TokenPair,
    TokenService, TokenType, TokenVerification, VerificationFailure,
};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use keyward_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::authority::Authority;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::gate::{AuthContext, AuthGate};
    pub use crate::rbac::{CreateRole, NewPermission, Permission, Role, RoleResolver};
    pub use crate::session::{AuthEvent, AuthEventType, Session, SessionRegistry};
    pub use crate::store::{KeyValueStore, MemoryStore};
    pub use crate::token::{
        AccessClaims, AccessGrant, RefreshOptions, TokenPair, TokenService, TokenVerification,
    };
}
