//! Application configuration and persistence utilities.

#[cfg(feature = "config-files")]
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::types::ChainId;

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Other configuration error.
    #[error("{0}")]
    Other(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway URL overrides per chain. Chains not listed use the built-in defaults.
    #[serde(default)]
    pub gateways: BTreeMap<ChainId, String>,
    /// Seconds between periodic balance refreshes.
    #[serde(default = "default_balance_poll_secs")]
    pub balance_poll_secs: u64,
    /// Records requested per history page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Maximum concurrent gateway requests per chain.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Addresses followed without a signing session, per chain.
    #[serde(default)]
    pub watched: BTreeMap<ChainId, String>,
    /// Run the contact list background sync while a session is active.
    #[serde(default = "default_contact_sync")]
    pub contact_sync: bool,
}

fn default_balance_poll_secs() -> u64 {
    60
}

fn default_page_size() -> u32 {
    25
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_contact_sync() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateways: BTreeMap::new(),
            balance_poll_secs: default_balance_poll_secs(),
            page_size: default_page_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
            watched: BTreeMap::new(),
            contact_sync: default_contact_sync(),
        }
    }
}

impl AppConfig {
    pub fn gateway(&self, chain: ChainId) -> Option<&str> {
        self.gateways.get(&chain).map(String::as_str)
    }

    /// Follow an address on a chain, replacing any previous one.
    pub fn watch(&mut self, chain: ChainId, address: String) {
        self.watched.insert(chain, address);
    }

    pub fn unwatch(&mut self, chain: ChainId) -> bool {
        self.watched.remove(&chain).is_some()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Other("page_size must be at least 1".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Other(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.balance_poll_secs == 0 {
            return Err(ConfigError::Other("balance_poll_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ==================== Path Utilities ====================

/// Get the config directory.
#[cfg(feature = "config-files")]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    ProjectDirs::from("io", "ledgerlink", "ledgerlink")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| ConfigError::Other("Could not determine config directory".to_string()))
}

/// Get the config file path.
#[cfg(feature = "config-files")]
pub fn get_config_path() -> Result<std::path::PathBuf, ConfigError> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

// ==================== Config I/O ====================

/// Load configuration from disk. A missing file yields the defaults.
#[cfg(feature = "config-files")]
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to disk.
#[cfg(feature = "config-files")]
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.page_size, 25);
        assert!(config.contact_sync);
    }

    #[test]
    fn test_gateway_overrides() {
        let json = r#"{"gateways":{"BTC":"http://localhost:8332"},"watched":{"ETH":"0xabc"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.gateway(ChainId::Btc), Some("http://localhost:8332"));
        assert_eq!(config.gateway(ChainId::Eth), None);
        assert_eq!(config.watched.get(&ChainId::Eth).map(String::as_str), Some("0xabc"));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let config = AppConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Other(_))));
    }

    #[test]
    fn test_watch_unwatch() {
        let mut config = AppConfig::default();
        config.watch(ChainId::Lsk, "lsk123".into());
        assert!(config.unwatch(ChainId::Lsk));
        assert!(!config.unwatch(ChainId::Lsk));
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join(format!("ledgerlink-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let mut config = AppConfig::default();
        config.watch(ChainId::Btc, "1Abc".into());
        config.balance_poll_secs = 5;

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("ledgerlink-definitely-missing/config.json");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }
}
