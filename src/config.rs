//! TOML configuration with serde defaults.
//!
//! Every section is optional; a missing config file yields a fully defaulted
//! instance. The token-signing secret comes from the `KINFEED_TOKEN_SECRET`
//! environment variable, then the `[auth]` section, and failing both is
//! generated fresh per process (tokens then do not survive a restart, which
//! is acceptable for development).

use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default bearer token lifetime in minutes.
pub const DEFAULT_TOKEN_TTL_MINUTES: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Defaults to `kinfeed.db` in the
    /// platform data directory.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        directories::ProjectDirs::from("dev", "kinfeed", "kinfeed")
            .map(|dirs| dirs.data_dir().join("kinfeed.db"))
            .unwrap_or_else(|| PathBuf::from("kinfeed.db"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token lifetime. Family switches re-issue a fresh token with a
    /// fresh expiry; there is no refresh mechanism.
    pub token_ttl_minutes: u64,
    /// Token-signing secret. The `KINFEED_TOKEN_SECRET` environment variable
    /// takes precedence.
    pub token_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
            token_secret: None,
        }
    }
}

impl Config {
    /// Load from a TOML file, or return defaults if the file is absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!("Config file {} not found — using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Resolve the token-signing secret: env var first, then the config
    /// file, then an ephemeral random secret.
    pub fn token_secret(&self) -> String {
        if let Ok(secret) = std::env::var("KINFEED_TOKEN_SECRET") {
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                return secret;
            }
        }
        if let Some(secret) = self.auth.token_secret.as_deref() {
            let secret = secret.trim();
            if !secret.is_empty() {
                return secret.to_owned();
            }
        }
        tracing::warn!(
            "KINFEED_TOKEN_SECRET not set — using an ephemeral secret; \
             issued tokens will not survive a restart"
        );
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.auth.token_ttl_minutes.max(1) * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.auth.token_ttl_minutes, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9001

            [auth]
            token_ttl_minutes = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.token_ttl_secs(), 300);
    }

    #[test]
    fn token_secret_read_from_config_file() {
        let config: Config =
            toml::from_str("[auth]\ntoken_secret = \"file-secret\"\n").unwrap();
        assert_eq!(config.token_secret(), "file-secret");
    }

    #[test]
    fn ttl_floor_is_one_minute() {
        let config: Config = toml::from_str("[auth]\ntoken_ttl_minutes = 0\n").unwrap();
        assert_eq!(config.token_ttl_secs(), 60);
    }
}
