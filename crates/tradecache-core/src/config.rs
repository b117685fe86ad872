//! Configuration for the resilience layer.
//!
//! Settings are read from `~/.config/tradecache/config.json` when present and
//! fall back to defaults otherwise. Environment variables (optionally from a
//! `.env` file) override the file so a deployment can repoint the client
//! without rewriting it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tradecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// How often the coordinator pulls server preferences.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Quiet period after the last local change before preferences are pushed.
const DEFAULT_PUSH_DEBOUNCE_MS: u64 = 1_000;

/// Window in which a repeated change to the same symbol is ignored.
const DEFAULT_SYMBOL_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend, e.g. `https://app.example.com/api`.
    pub api_base_url: String,
    /// Origin the interceptor treats as same-origin.
    pub origin: String,
    /// Build tag; cache partitions from any other build are evicted.
    pub build_version: String,
    pub sync_interval_secs: u64,
    pub push_debounce_ms: u64,
    pub symbol_debounce_ms: u64,
    /// Paths fetched eagerly on install.
    pub precache: Vec<String>,
    /// API paths that get a synthesized offline payload instead of an error.
    pub offline_endpoints: Vec<String>,
    /// Overrides the platform cache directory for durable storage.
    pub storage_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            origin: "http://localhost:3000".to_string(),
            build_version: "v1".to_string(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            push_debounce_ms: DEFAULT_PUSH_DEBOUNCE_MS,
            symbol_debounce_ms: DEFAULT_SYMBOL_DEBOUNCE_MS,
            precache: vec![
                "/".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192.png".to_string(),
                "/icons/icon-512.png".to_string(),
            ],
            offline_endpoints: vec![
                "/api/user".to_string(),
                "/api/user/balance".to_string(),
                "/api/balance".to_string(),
                "/api/auth/me".to_string(),
            ],
            storage_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        // Missing .env is the normal case
        let _ = dotenvy::dotenv();
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from an explicit path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
            debug!(path = %path.display(), "Loaded config");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("TRADECACHE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(origin) = var("TRADECACHE_ORIGIN") {
            self.origin = origin;
        }
        if let Some(version) = var("TRADECACHE_BUILD_VERSION") {
            self.build_version = version;
        }
        if let Some(secs) = var("TRADECACHE_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = secs
                .parse()
                .with_context(|| format!("Invalid TRADECACHE_SYNC_INTERVAL_SECS: {}", secs))?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            anyhow::bail!("sync_interval_secs must be at least 1");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root directory for the durable key-value storage.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    pub fn symbol_debounce(&self) -> Duration {
        Duration::from_millis(self.symbol_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_from_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.push_debounce(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"build_version": "v9", "sync_interval_secs": 5}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.build_version, "v9");
        assert_eq!(config.sync_interval_secs, 5);
        assert_eq!(config.symbol_debounce_ms, DEFAULT_SYMBOL_DEBOUNCE_MS);
        assert!(config.precache.contains(&"/".to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRADECACHE_API_URL", "https://example.test/api"),
            ("TRADECACHE_SYNC_INTERVAL_SECS", "12"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api_base_url, "https://example.test/api");
        assert_eq!(config.sync_interval_secs, 12);
        assert_eq!(config.origin, "http://localhost:3000");
    }

    #[test]
    fn test_invalid_interval_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "TRADECACHE_SYNC_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_sync_interval_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "TRADECACHE_SYNC_INTERVAL_SECS").then(|| "0".to_string())
        });
        assert!(result.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sync_interval_secs": 0}"#).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("sync_interval_secs"));
    }

    #[test]
    fn test_storage_dir_overrides_cache_dir() {
        let config = Config {
            storage_dir: Some(PathBuf::from("/tmp/tc")),
            ..Config::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/tc"));
    }
}
