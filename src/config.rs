//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. an explicit path (e.g. `--config <path>`)
//! 2. `~/.keepsake/config.toml` (user)
//! 3. built-in defaults
//!
//! Every field is optional; a partial file keeps the defaults for the rest.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::gateway::GatewayConfig;
use crate::state::DEFAULT_NAMESPACE;
use crate::temporal::TemporalOptions;
use crate::{KeepsakeError, Result};

/// Name of the state file inside the storage directory.
const STATE_FILE: &str = "state.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeepsakeConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
}

/// Read gateway cache TTLs.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// First-page TTL in seconds (default: 60).
    #[serde(default = "default_page_ttl")]
    pub page_ttl_secs: u64,
    /// Single-document TTL in seconds (default: 300).
    #[serde(default = "default_document_ttl")]
    pub document_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_ttl_secs: default_page_ttl(),
            document_ttl_secs: default_document_ttl(),
        }
    }
}

fn default_page_ttl() -> u64 {
    60
}

fn default_document_ttl() -> u64 {
    300
}

/// State store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Prefix for durable keys (default: "keepsake").
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Directory holding the state file (default: platform data dir).
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            storage_dir: None,
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Controller autosave settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AutosaveConfig {
    /// Debounce window in milliseconds (default: 2000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Save timeout in seconds (default: 30).
    #[serde(default = "default_save_timeout")]
    pub save_timeout_secs: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            save_timeout_secs: default_save_timeout(),
        }
    }
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_save_timeout() -> u64 {
    30
}

impl KeepsakeConfig {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path that does not exist is an error; a missing user
    /// config falls back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| KeepsakeError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            KeepsakeError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            KeepsakeError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(KeepsakeError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Ok(dirs::home_dir()
            .map(|home| home.join(".keepsake").join("config.toml"))
            .filter(|path| path.exists()))
    }

    /// TTLs for a [`ReadGateway`](crate::ReadGateway).
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new()
            .page_ttl(Duration::from_secs(self.cache.page_ttl_secs))
            .document_ttl(Duration::from_secs(self.cache.document_ttl_secs))
    }

    /// Path of the file used by [`FileStorage`](crate::FileStorage).
    ///
    /// `storage_dir` when set, else `<data dir>/keepsake`, else
    /// `~/.keepsake`.
    pub fn storage_path(&self) -> Result<PathBuf> {
        let dir = match &self.state.storage_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("keepsake"))
                .or_else(|| dirs::home_dir().map(|h| h.join(".keepsake")))
                .ok_or_else(|| {
                    KeepsakeError::Configuration(
                        "No data directory found; set [state] storage_dir".to_string(),
                    )
                })?,
        };
        Ok(dir.join(STATE_FILE))
    }

    /// Apply the autosave section to controller options.
    pub fn apply(&self, options: TemporalOptions) -> TemporalOptions {
        options
            .auto_save_delay(Duration::from_millis(self.autosave.delay_ms))
            .save_timeout(Duration::from_secs(self.autosave.save_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = KeepsakeConfig::default();
        assert_eq!(config.cache.page_ttl_secs, 60);
        assert_eq!(config.cache.document_ttl_secs, 300);
        assert_eq!(config.state.namespace, "keepsake");
        assert!(config.state.storage_dir.is_none());
        assert_eq!(config.autosave.delay_ms, 2000);
        assert_eq!(config.autosave.save_timeout_secs, 30);
    }

    #[test]
    fn parse_partial_config_keeps_defaults() {
        let config = KeepsakeConfig::from_toml(
            r#"
            [cache]
            page_ttl_secs = 15
        "#,
        )
        .unwrap();
        assert_eq!(config.cache.page_ttl_secs, 15);
        assert_eq!(config.cache.document_ttl_secs, 300);
        assert_eq!(config.autosave.delay_ms, 2000);
    }

    #[test]
    fn storage_dir_overrides_data_dir() {
        let config = KeepsakeConfig::from_toml(
            r#"
            [state]
            storage_dir = "/var/lib/lms"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.storage_path().unwrap(),
            PathBuf::from("/var/lib/lms/state.json")
        );
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = KeepsakeConfig::from_toml("[cache\npage_ttl_secs = ").unwrap_err();
        assert!(matches!(err, KeepsakeError::Configuration(_)));
    }

    #[test]
    fn config_not_found_returns_error() {
        let err = KeepsakeConfig::load(Some(Path::new("/nonexistent/keepsake.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
