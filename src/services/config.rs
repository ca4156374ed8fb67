use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::models::config::RecognizerConfig;

const APP_DIR: &str = "match-recognizer";
const CONFIG_FILE: &str = "config.json";

/// Configuration manager for recognizer settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for `<platform config dir>/match-recognizer/config.json`
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(APP_DIR);

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
        })
    }

    /// Manager for an explicit config file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Save configuration to disk, creating the directory if needed
    pub fn save(&self, config: &RecognizerConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        // Pretty print for human editing
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, json)?;

        debug!(path = %self.config_path.display(), "Config saved");
        Ok(())
    }

    /// Load configuration from disk
    ///
    /// If config file doesn't exist, returns default configuration
    pub fn load(&self) -> Result<RecognizerConfig, ConfigError> {
        if !self.config_exists() {
            debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(RecognizerConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)?;
        let config: RecognizerConfig = serde_json::from_str(&content)?;

        Ok(config)
    }

    /// Get the config file path
    pub fn config_file_path(&self) -> &Path {
        &self.config_path
    }

    /// Check if config file exists
    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    /// Helper to create a manager inside a fresh temp directory
    fn create_test_manager() -> (TempDir, ConfigManager) {
        let dir = tempdir().unwrap();
        // Nested so save() has to create the directory
        let manager = ConfigManager::with_path(dir.path().join(APP_DIR).join(CONFIG_FILE));
        (dir, manager)
    }

    #[test]
    fn test_platform_config_path() {
        let Ok(manager) = ConfigManager::new() else {
            // No home directory in this environment
            return;
        };

        let path = manager.config_file_path();
        assert!(path.ends_with(Path::new(APP_DIR).join(CONFIG_FILE)));
    }

    #[test]
    fn test_config_save() {
        let (_dir, manager) = create_test_manager();

        manager.save(&RecognizerConfig::default()).unwrap();
        assert!(manager.config_exists(), "Config file should exist after save");

        // Should be valid JSON
        let file_content = fs::read_to_string(manager.config_file_path()).unwrap();
        let _parsed: RecognizerConfig =
            serde_json::from_str(&file_content).expect("Saved config should be valid JSON");
    }

    #[test]
    fn test_config_load_default_when_not_exists() {
        let (_dir, manager) = create_test_manager();
        assert!(!manager.config_exists());

        let config = manager.load().unwrap();
        assert_eq!(config, RecognizerConfig::default());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_dir, manager) = create_test_manager();

        let mut config = RecognizerConfig::default();
        config.worker.init_timeout_ms = 2_000;
        config.ocr.endpoint = "http://ocr.local:9000".to_string();
        config.regions.result_thresholds = vec![90, 180];

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.worker.init_timeout_ms, 2_000);
        assert_eq!(loaded.regions.result_thresholds, vec![90, 180]);
    }

    #[test]
    fn test_config_overwrite() {
        let (_dir, manager) = create_test_manager();

        let mut config1 = RecognizerConfig::default();
        config1.cache.profile_ttl_ms = 1;
        manager.save(&config1).unwrap();

        let mut config2 = RecognizerConfig::default();
        config2.cache.profile_ttl_ms = 2;
        manager.save(&config2).unwrap();

        assert_eq!(manager.load().unwrap().cache.profile_ttl_ms, 2);
    }

    #[test]
    fn test_config_parse_error() {
        let (dir, _) = create_test_manager();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let manager = ConfigManager::with_path(&path);
        assert!(matches!(manager.load(), Err(ConfigError::Parse(_))));
    }
}
