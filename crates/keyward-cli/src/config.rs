use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use keyward_auth::AuthConfig;

/// Loads `path` if it exists, then applies `KEYWARD__SECTION__KEY`
/// environment overrides, then validates.
pub fn load_config(path: &str) -> Result<AuthConfig> {
    let mut builder = Config::builder();
    if Path::new(path).exists() {
        builder = builder.add_source(File::with_name(path));
    } else {
        tracing::debug!(path = %path, "Config file not found, using defaults");
    }
    // e.g. KEYWARD__TOKENS__ACCESS__SECRET=..., KEYWARD__SESSION__MAX_SESSIONS=3
    builder = builder.add_source(
        Environment::with_prefix("KEYWARD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let merged: AuthConfig = builder
        .build()
        .context("config build error")?
        .try_deserialize()
        .context("config deserialize error")?;
    merged.validate().context("invalid configuration")?;
    Ok(merged)
}
