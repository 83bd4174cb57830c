use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub study: StudyConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the recordings backend (no trailing slash needed)
    pub base_url: String,
    /// Upper bound for a single request, including the audio upload
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// How often the online/offline indicator is refreshed
    pub check_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Number of prompts in the script catalog
    pub total_required: u32,
    pub spontaneous_required: u32,
    pub spontaneous_prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory (database, recordings, locks)
    pub data_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://twi-speech-backend-data.onrender.com".to_string(),
            request_timeout_seconds: 60,
            connect_timeout_seconds: 10,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 15,
            probe_timeout_seconds: 5,
        }
    }
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            total_required: 163,
            spontaneous_required: 8,
            spontaneous_prefix: "Spontaneous_".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.max(1))
    }
}

impl NetworkConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Directory holding the database, the recordings directory and lock files.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
            _ => global::data_dir(),
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.check_interval(), Duration::from_secs(15));
        assert_eq!(config.study.total_required, 163);
        assert_eq!(config.study.spontaneous_required, 8);
        assert_eq!(config.study.spontaneous_prefix, "Spontaneous_");
        assert!(config.server.base_url.starts_with("https://"));
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            base_url = "http://127.0.0.1:8000"

            [study]
            total_required = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.server.request_timeout_seconds, 60);
        assert_eq!(config.study.total_required, 20);
        assert_eq!(config.study.spontaneous_required, 8);
        assert_eq!(config.network.check_interval_seconds, 15);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.storage.data_dir = Some("/var/lib/twi".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.storage.data_dir.as_deref(), Some("/var/lib/twi"));
        assert_eq!(loaded.data_dir().unwrap(), PathBuf::from("/var/lib/twi"));
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let mut config = Config::default();
        config.server.request_timeout_seconds = 0;
        config.network.check_interval_seconds = 0;
        assert_eq!(config.server.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.network.check_interval(), Duration::from_secs(1));
    }
}
