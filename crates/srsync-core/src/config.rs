//! srsync configuration.
//!
//! Search order:
//! 1. an explicit path passed by the caller
//! 2. `srsync.toml` in the current directory
//! 3. `~/.config/srsync/config.toml`
//!
//! Environment variable overrides: `SRSYNC_SERVER_URL`, `SRSYNC_PROFILE`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleConfig;

/// Settings of the authoritative store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// JSON snapshot the store is loaded from and persisted to.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Title of the installation-wide deck for self-authored cards.
    #[serde(default = "default_canonical_title")]
    pub canonical_deck_title: String,
    /// Default cap on `get_due_cards` results.
    #[serde(default = "default_due_limit")]
    pub due_limit: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./srsync-store.json")
}
fn default_canonical_title() -> String {
    "My cards".to_string()
}
fn default_due_limit() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            canonical_deck_title: default_canonical_title(),
            due_limit: default_due_limit(),
        }
    }
}

/// Settings of a client device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sync endpoints, e.g. `http://localhost:8080/srs`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Active profile name; local blobs are keyed by it.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Directory holding local blobs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Version marker; a mismatch wipes local blobs.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_profile() -> String {
    "Guest".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./srsync-data")
}
fn default_cache_version() -> String {
    "6".to_string()
}
fn default_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            profile: default_profile(),
            data_dir: default_data_dir(),
            cache_version: default_cache_version(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Top-level srsync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SrsyncConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl SrsyncConfig {
    pub fn validate(&self) -> Result<()> {
        self.schedule
            .validate()
            .map_err(|e| anyhow::anyhow!("[schedule] {e}"))?;
        if self.server.canonical_deck_title.trim().is_empty() {
            anyhow::bail!("[server] canonical_deck_title must not be empty");
        }
        if self.server.due_limit == 0 {
            anyhow::bail!("[server] due_limit must be positive");
        }
        if self.client.profile.trim().is_empty() {
            anyhow::bail!("[client] profile must not be empty");
        }
        Ok(())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_path(p: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&p.to_string_lossy()))
}

/// Load configuration from the default locations.
pub fn load_config() -> Result<SrsyncConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<SrsyncConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("srsync.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => SrsyncConfig::default(),
    };

    if let Ok(url) = std::env::var("SRSYNC_SERVER_URL") {
        if !url.trim().is_empty() {
            config.client.base_url = Some(url);
        }
    }
    if let Ok(profile) = std::env::var("SRSYNC_PROFILE") {
        if !profile.trim().is_empty() {
            config.client.profile = profile;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Parse TOML text and expand `${VAR}` references in string settings.
pub fn parse_config(content: &str) -> Result<SrsyncConfig> {
    let mut config: SrsyncConfig = toml::from_str(content)?;
    config.server.store_path = resolve_path(&config.server.store_path);
    config.server.canonical_deck_title = resolve_env_vars(&config.server.canonical_deck_title);
    config.client.base_url = config
        .client
        .base_url
        .as_deref()
        .map(resolve_env_vars)
        .filter(|url| !url.trim().is_empty());
    config.client.profile = resolve_env_vars(&config.client.profile);
    config.client.data_dir = resolve_path(&config.client.data_dir);
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("srsync"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_SRSYNC_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_SRSYNC_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_SRSYNC_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("no_close_${"), "no_close_${");
        std::env::remove_var("_SRSYNC_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = SrsyncConfig::default();
        assert_eq!(config.schedule.unit_secs, 86_400);
        assert_eq!(config.schedule.ceiling_units, 512);
        assert_eq!(config.server.canonical_deck_title, "My cards");
        assert_eq!(config.server.due_limit, 1000);
        assert_eq!(config.client.profile, "Guest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        std::env::set_var("_SRSYNC_TEST_HOST", "sync.example.org");
        let config = parse_config(
            r#"
[schedule]
unit_secs = 60

[client]
base_url = "https://${_SRSYNC_TEST_HOST}/srs"
profile = "anna"
"#,
        )
        .unwrap();
        std::env::remove_var("_SRSYNC_TEST_HOST");

        assert_eq!(config.schedule.unit_secs, 60);
        assert_eq!(config.schedule.hard_units, 1);
        assert_eq!(
            config.client.base_url.as_deref(),
            Some("https://sync.example.org/srs")
        );
        assert_eq!(config.client.profile, "anna");
        assert_eq!(config.server.due_limit, 1000);
    }

    #[test]
    fn unresolved_base_url_means_local() {
        let config = parse_config("[client]\nbase_url = \"${_SRSYNC_UNSET_URL}\"\n").unwrap();
        assert!(config.client.base_url.is_none());
    }

    #[test]
    fn validate_rejects_zero_hard_interval() {
        let config = parse_config("[schedule]\nhard_units = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hard_units"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srsync.toml");
        std::fs::write(&path, "[server]\ndue_limit = 25\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.server.due_limit, 25);
    }
}
