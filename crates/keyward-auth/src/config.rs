//! Authority configuration.
//!
//! Plain serde structs with defaults for every field except the signing
//! secrets. Loading (files, environment) is the binary's concern; this module
//! only describes the shape and checks it.
//!
//! # Example (TOML)
//!
//! ```toml
//! [tokens.access]
//! secret = "change-me"
//! expires_in = "15m"
//! algorithm = "HS256"
//!
//! [tokens.refresh]
//! secret = "change-me-too"
//! expires_in = "7d"
//!
//! [session]
//! ttl = "24h"
//! max_sessions = 5
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::token::SigningAlgorithm;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access and refresh credential classes.
    pub tokens: TokensConfig,

    /// Session registry behavior.
    pub session: SessionConfig,

    /// Role/permission resolver behavior.
    pub rbac: RbacConfig,

    /// Store backend selection.
    pub store: StoreConfig,
}

const DEFAULT_ACCESS_EXPIRY: &str = "15m";
const DEFAULT_REFRESH_EXPIRY: &str = "7d";

/// Longest accepted credential lifetime (100 years).
pub const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Signing settings for both credential classes.
///
/// A class section that omits `expires_in` keeps that class's default
/// lifetime.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokensConfig {
    #[serde(deserialize_with = "access_class")]
    pub access: CredentialClassConfig,
    #[serde(deserialize_with = "refresh_class")]
    pub refresh: CredentialClassConfig,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            access: CredentialClassConfig::with_expiry(DEFAULT_ACCESS_EXPIRY),
            refresh: CredentialClassConfig::with_expiry(DEFAULT_REFRESH_EXPIRY),
        }
    }
}

/// A class section as written, before per-class defaults apply.
#[derive(Deserialize)]
struct ClassSection {
    #[serde(default)]
    secret: String,
    expires_in: Option<String>,
    #[serde(default)]
    algorithm: SigningAlgorithm,
    issuer: Option<String>,
    audience: Option<String>,
}

impl ClassSection {
    fn with_default_expiry(self, expires_in: &str) -> CredentialClassConfig {
        CredentialClassConfig {
            secret: self.secret,
            expires_in: self.expires_in.unwrap_or_else(|| expires_in.to_string()),
            algorithm: self.algorithm,
            issuer: self.issuer,
            audience: self.audience,
        }
    }
}

fn access_class<'de, D>(deserializer: D) -> Result<CredentialClassConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(ClassSection::deserialize(deserializer)?.with_default_expiry(DEFAULT_ACCESS_EXPIRY))
}

fn refresh_class<'de, D>(deserializer: D) -> Result<CredentialClassConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(ClassSection::deserialize(deserializer)?.with_default_expiry(DEFAULT_REFRESH_EXPIRY))
}

/// Signing settings for one credential class.
///
/// `issuer` and `audience` are only placed in (and checked against) tokens
/// when set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialClassConfig {
    /// HMAC secret. Required.
    pub secret: String,

    /// Lifetime as digits with an optional unit (`30`, `15m`, `7d`).
    pub expires_in: String,

    /// HMAC algorithm.
    pub algorithm: SigningAlgorithm,

    /// Value of the `iss` claim.
    pub issuer: Option<String>,

    /// Value of the `aud` claim.
    pub audience: Option<String>,
}

impl CredentialClassConfig {
    fn with_expiry(expires_in: &str) -> Self {
        Self {
            secret: String::new(),
            expires_in: expires_in.to_string(),
            algorithm: SigningAlgorithm::default(),
            issuer: None,
            audience: None,
        }
    }

    /// Parsed lifetime.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `expires_in` is not a valid
    /// expiry string.
    pub fn expiry(&self) -> Result<Duration, AuthError> {
        parse_expiry(&self.expires_in)
    }
}

impl Default for CredentialClassConfig {
    fn default() -> Self {
        Self::with_expiry(DEFAULT_ACCESS_EXPIRY)
    }
}

/// Session registry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime, also the store TTL of the record.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Extend the session on every successful read.
    pub rolling: bool,

    /// Per-user cap; the oldest sessions are evicted beyond it.
    pub max_sessions: usize,

    /// Store `device_id` / `device_info` on sessions.
    pub track_devices: bool,

    /// Record auth events.
    pub log_events: bool,

    /// Period of the background cleanup task.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            rolling: true,
            max_sessions: 5,
            track_devices: true,
            log_events: true,
            cleanup_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Role/permission resolver settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Accepted for compatibility; role inheritance is not evaluated.
    pub enable_hierarchy: bool,

    /// Role given to users by `assign_default_role`.
    pub default_role: String,

    /// Lifetime of cached role and permission lookups.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            enable_hierarchy: false,
            default_role: "user".to_string(),
            cache_ttl: crate::cache::DEFAULT_CACHE_TTL,
        }
    }
}

/// Which [`KeyValueStore`](crate::store::KeyValueStore) to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state is lost on restart.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// Store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection URL, used by the Redis backend.
    pub redis_url: String,

    /// Maximum pooled connections.
    pub pool_size: usize,

    /// Pool wait/create timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            timeout_ms: 5000,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::configuration(err.to_string())
    }
}

impl AuthConfig {
    /// Default configuration with the two signing secrets set.
    #[must_use]
    pub fn with_secrets(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.tokens.access.secret = access.into();
        config.tokens.refresh.secret = refresh.into();
        config
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a signing secret is empty, and
    /// `ConfigError::InvalidValue` if:
    /// - An expiry string does not parse
    /// - `max_sessions` is zero
    /// - `default_role` is empty
    /// - The Redis backend is selected without a URL or with an empty pool
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (class, cfg) in [
            ("tokens.access", &self.tokens.access),
            ("tokens.refresh", &self.tokens.refresh),
        ] {
            if cfg.secret.is_empty() {
                return Err(ConfigError::Missing(format!("{class}.secret")));
            }
            if let Err(e) = cfg.expiry() {
                return Err(ConfigError::InvalidValue(format!(
                    "{class}.expires_in: {e}"
                )));
            }
        }

        if self.session.max_sessions == 0 {
            return Err(ConfigError::InvalidValue(
                "session.max_sessions must be > 0".to_string(),
            ));
        }

        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.ttl must be > 0".to_string(),
            ));
        }

        if self.rbac.default_role.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "rbac.default_role cannot be empty".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis {
            if self.store.redis_url.is_empty() {
                return Err(ConfigError::Missing("store.redis_url".to_string()));
            }
            if self.store.pool_size == 0 {
                return Err(ConfigError::InvalidValue(
                    "store.pool_size must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Parses an expiry string into a duration.
///
/// Accepts digits followed by an optional unit: `s`, `m`, `h`, `d`, `w`.
/// Bare digits are seconds.
///
/// # Errors
///
/// Returns `AuthError::Configuration` for anything else, including an empty
/// string, a sign, whitespace, an unknown unit, or a lifetime beyond
/// [`MAX_EXPIRY`].
pub fn parse_expiry(input: &str) -> Result<Duration, AuthError> {
    let invalid = || AuthError::configuration(format!("Invalid expiry format: '{input}'"));

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }

    let multiplier: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(invalid()),
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .filter(|expiry| *expiry <= MAX_EXPIRY)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiry_units() {
        assert_eq!(parse_expiry("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_expiry("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_expiry("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_expiry("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_expiry("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_expiry("1w").unwrap(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_parse_expiry_rejects_garbage() {
        for bad in [
            "",
            "d",
            "7x",
            "7 d",
            "-5m",
            "1.5h",
            "7dd",
            "99999999999999999999w",
            "20000000000000w",
            "5300w",
        ] {
            let err = parse_expiry(bad).unwrap_err();
            assert!(
                matches!(err, AuthError::Configuration { .. }),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_expiry_upper_bound() {
        assert_eq!(parse_expiry("5200w").unwrap(), Duration::from_secs(5200 * 604_800));
        assert_eq!(parse_expiry("36500d").unwrap(), MAX_EXPIRY);
        assert!(parse_expiry("36501d").is_err());
    }

    #[test]
    fn test_huge_expiry_fails_validation() {
        let mut config = AuthConfig::with_secrets("a", "r");
        config.tokens.access.expires_in = "20000000000000w".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tokens.access.expires_in"));
    }

    #[test]
    fn test_partial_class_section_keeps_class_lifetime() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "tokens": {
                "access": { "secret": "s1" },
                "refresh": { "secret": "s2" }
            }
        }))
        .unwrap();

        assert_eq!(config.tokens.access.expires_in, "15m");
        assert_eq!(config.tokens.refresh.expires_in, "7d");
        assert_eq!(config.tokens.refresh.secret, "s2");
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.tokens.access.expires_in, "15m");
        assert_eq!(config.tokens.refresh.expires_in, "7d");
        assert_eq!(config.tokens.access.algorithm, SigningAlgorithm::HS256);
        assert_eq!(config.session.max_sessions, 5);
        assert!(config.session.rolling);
        assert_eq!(config.rbac.default_role, "user");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_default_config_requires_secrets() {
        let err = AuthConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("tokens.access.secret"));

        assert!(AuthConfig::with_secrets("a", "r").validate().is_ok());
    }

    #[test]
    fn test_bad_expiry_fails_validation() {
        let mut config = AuthConfig::with_secrets("a", "r");
        config.tokens.refresh.expires_in = "soon".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("tokens.refresh.expires_in"));
    }

    #[test]
    fn test_zero_max_sessions_fails_validation() {
        let mut config = AuthConfig::with_secrets("a", "r");
        config.session.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = AuthConfig::with_secrets("a", "r");
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Missing(_)
        ));
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "tokens": {
                "access": { "secret": "s1", "expires_in": "5m", "algorithm": "HS512", "issuer": "keyward" },
                "refresh": { "secret": "s2" }
            },
            "session": { "ttl": "2h", "max_sessions": 3 },
            "rbac": { "cache_ttl": "30s" },
            "store": { "backend": "redis" }
        }))
        .unwrap();

        assert_eq!(config.tokens.access.algorithm, SigningAlgorithm::HS512);
        assert_eq!(config.tokens.access.issuer.as_deref(), Some("keyward"));
        assert_eq!(config.tokens.refresh.expires_in, "7d");
        assert_eq!(config.session.ttl, Duration::from_secs(7200));
        assert_eq!(config.session.max_sessions, 3);
        assert!(config.session.log_events);
        assert_eq!(config.rbac.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_error_into_auth_error() {
        let err: AuthError = ConfigError::Missing("tokens.access.secret".into()).into();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }
}
