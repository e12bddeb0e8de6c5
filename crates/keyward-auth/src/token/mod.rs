//! Credential issuance, verification, rotation and revocation.

pub mod blacklist;
pub mod claims;
pub mod jwt;
pub mod service;

use sha2::{Digest, Sha256};

pub use blacklist::TokenBlacklist;
pub use claims::{
    AccessClaims, AccessGrant, RefreshClaims, RefreshOptions, TokenPair, TokenType,
    TokenVerification, VerificationFailure,
};
pub use jwt::{JwtError, JwtService, SigningAlgorithm, decode_unverified};
pub use service::TokenService;

/// Short, non-reversible token identifier for log lines.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}
