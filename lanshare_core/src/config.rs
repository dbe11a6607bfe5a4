use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "lanshare";
const APP_NAME: &str = "lan_file_share";
const CONFIG_FILE: &str = "config.json";
const RESUME_DIR: &str = "resume";

/// Environment variable that redirects the config directory (used by tests)
pub const CONFIG_DIR_ENV: &str = "LANSHARE_CONFIG_DIR";

const MIB: u64 = 1024 * 1024;

/// Transfer and discovery settings.
///
/// Every field has a default, so a partial `config.json` only overrides
/// what it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Files above this size are refused by the catalog
    pub max_file_size_mb: u64,
    /// Files above this size are shared with a warning
    pub warn_file_size_mb: u64,

    pub connection_timeout_secs: u64,
    /// Upper bound for a single range request
    pub download_timeout_secs: u64,
    /// Upper bound for a single socket read
    pub socket_timeout_secs: u64,
    pub max_concurrent_downloads: usize,

    pub enable_multithreaded_download: bool,
    pub min_file_size_for_multithread: u64,
    pub max_download_threads: usize,
    pub thread_chunk_size: u64,
    pub enable_resume: bool,
    /// Number of throughput samples averaged for the speed estimate
    pub speed_window: usize,

    pub server_port: u16,
    pub discovery_port: u16,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10240,
            warn_file_size_mb: 1024,
            connection_timeout_secs: 30,
            download_timeout_secs: 300,
            socket_timeout_secs: 30,
            max_concurrent_downloads: 5,
            enable_multithreaded_download: true,
            min_file_size_for_multithread: 10 * MIB,
            max_download_threads: 4,
            thread_chunk_size: 2 * MIB,
            enable_resume: true,
            speed_window: 10,
            server_port: 8000,
            discovery_port: 8001,
        }
    }
}

impl TransferConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::get_config_path()
            .ok_or_else(|| anyhow::anyhow!("No config directory available"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * MIB
    }

    pub fn warn_file_size_bytes(&self) -> u64 {
        self.warn_file_size_mb * MIB
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(test_path) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(test_path));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Directory holding one resume record per download job
pub fn get_resume_dir() -> PathBuf {
    get_config_dir()
        .unwrap_or_else(|| PathBuf::from(".lan_file_share"))
        .join(RESUME_DIR)
}

/// Default save directory: ~/Downloads/LANFileShare
pub fn get_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
        .or_else(|| directories::UserDirs::new().map(|dirs| dirs.home_dir().join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("LANFileShare")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TransferConfig::default();
        assert_eq!(config.min_file_size_for_multithread, 10 * 1024 * 1024);
        assert_eq!(config.thread_chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.max_download_threads, 4);
        assert_eq!(config.speed_window, 10);
        assert_eq!(config.discovery_port, 8001);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: TransferConfig =
            serde_json::from_str(r#"{"max_download_threads": 8, "server_port": 9100}"#).unwrap();
        assert_eq!(config.max_download_threads, 8);
        assert_eq!(config.server_port, 9100);
        assert_eq!(config.thread_chunk_size, TransferConfig::default().thread_chunk_size);
    }
}
