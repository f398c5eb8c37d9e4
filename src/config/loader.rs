//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable that overrides `upstream.password`.
pub const PASSWORD_ENV: &str = "PROXYAUTH_PASSWORD";

/// Environment variables consulted, in order, when `upstream.username` is empty.
pub const USERNAME_ENV: [&str; 2] = ["USERNAME", "USER"];

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, applying the process
/// environment overrides.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], with an explicit environment lookup.
pub fn load_config_with_env<F>(path: &Path, lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let content = fs::read_to_string(path)?;
    let mut config: ProxyConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Fill credentials from the environment.
///
/// The password variable always wins over the file so secrets can stay out of
/// it; the username variables only fill an empty value.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
        config.upstream.password = password;
    }

    if config.upstream.username.is_empty() {
        if let Some(username) = USERNAME_ENV
            .iter()
            .find_map(|key| lookup(key).filter(|u| !u.is_empty()))
        {
            config.upstream.username = username;
        }
    }
}
