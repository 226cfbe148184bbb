//! Configuration schema and loading.
//!
//! Settings live in `parley.toml` inside the data directory. Every section is
//! optional; `PARLEY_*` environment variables override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use parley_auth_bridge::{AuthSettings, NetworkSettings};
use parley_directory::SnapshotPaths;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub auth: AuthSettings,
    pub network: NetworkSettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

/// `[cache]`: snapshot locations and periodic refresh.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub users_path: Option<PathBuf>,
    pub channels_path: Option<PathBuf>,
    pub emoji_path: Option<PathBuf>,
    /// Seconds between full refreshes. Unset or 0 refreshes at startup only.
    pub refresh_interval_secs: Option<u64>,
}

impl CacheSettings {
    /// Snapshot paths, falling back to the data directory defaults.
    pub fn snapshot_paths(&self, data_dir: &Path) -> SnapshotPaths {
        let defaults = SnapshotPaths::in_dir(data_dir);
        SnapshotPaths {
            users: self.users_path.clone().unwrap_or(defaults.users),
            channels: self.channels_path.clone().unwrap_or(defaults.channels),
            emoji: self.emoji_path.clone().unwrap_or(defaults.emoji),
        }
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// `[query]`: page sizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Page size for time windows and cursor continuations.
    pub default_page_size: u32,
    pub default_search_page_size: u32,
    pub max_search_page_size: u32,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            default_search_page_size: 20,
            max_search_page_size: 100,
        }
    }
}

impl QuerySettings {
    /// Page sizes must be positive and defaults may not exceed their maximum.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("default_page_size", self.default_page_size),
            ("default_search_page_size", self.default_search_page_size),
            ("max_search_page_size", self.max_search_page_size),
        ] {
            if value == 0 {
                anyhow::bail!("[query] {} must be at least 1", key);
            }
        }
        if self.default_search_page_size > self.max_search_page_size {
            anyhow::bail!(
                "[query] default_search_page_size ({}) exceeds max_search_page_size ({})",
                self.default_search_page_size,
                self.max_search_page_size
            );
        }
        Ok(())
    }
}

impl ParleyConfig {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .query
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load the file, then apply `PARLEY_*` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PARLEY_DELEGATED_TOKEN") {
            self.auth.delegated_token = Some(v);
        }
        if let Some(v) = get("PARLEY_SESSION_TOKEN") {
            self.auth.session_token = Some(v);
        }
        if let Some(v) = get("PARLEY_SESSION_COOKIE") {
            self.auth.session_cookie = Some(v);
        }
        if let Some(v) = get("PARLEY_TEAM_ID") {
            self.auth.team_id = Some(v);
        }
        if let Some(v) = get("PARLEY_API_BASE") {
            self.network.api_base = v;
        }
        if let Some(v) = get("PARLEY_PROXY") {
            self.network.proxy = Some(v);
        }
        if let Some(v) = get("PARLEY_USER_AGENT") {
            self.network.user_agent = Some(v);
        }
        if let Some(v) = get("PARLEY_CA_BUNDLE") {
            self.network.ca_bundle = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PARLEY_TLS_INSECURE") {
            self.network.tls_insecure = parse_bool("PARLEY_TLS_INSECURE", &v)?;
        }
        if let Some(v) = get("PARLEY_USERS_CACHE") {
            self.cache.users_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PARLEY_CHANNELS_CACHE") {
            self.cache.channels_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PARLEY_EMOJI_CACHE") {
            self.cache.emoji_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PARLEY_REFRESH_INTERVAL_SECS") {
            let secs = v
                .trim()
                .parse()
                .with_context(|| format!("PARLEY_REFRESH_INTERVAL_SECS is not a number: {}", v))?;
            self.cache.refresh_interval_secs = Some(secs);
        }
        if let Some(v) = get("PARLEY_LOG_LEVEL") {
            self.log_level = Some(v);
        }
        self.query.validate()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got {}", key, other),
    }
}
