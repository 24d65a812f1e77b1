//! Configuration file support for otl866.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (OTL866_*)
//! 3. Local config file (./otl866.toml)
//! 4. Global config file (~/.config/otl866/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "otl866.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
}

/// Firmware update configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Erase key of the programmer model.
    pub erase_key: Option<u8>,
    /// First device address written.
    pub base_address: Option<u32>,
    /// Allow writes into the protected regions.
    #[serde(default, rename = "unsafe")]
    pub allow_unsafe: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "otl866").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }

        if other.update.erase_key.is_some() {
            self.update.erase_key = other.update.erase_key;
        }
        if other.update.base_address.is_some() {
            self.update.base_address = other.update.base_address;
        }
        if other.update.allow_unsafe {
            self.update.allow_unsafe = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.update.erase_key.is_none());
        assert!(config.update.base_address.is_none());
        assert!(!config.update.allow_unsafe);
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides_when_set() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyACM0".to_string());
        base.update.erase_key = Some(0x10);

        let mut other = Config::default();
        other.update.erase_key = Some(0x20);
        other.update.base_address = Some(0x2000);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.update.erase_key, Some(0x20));
        assert_eq!(base.update.base_address, Some(0x2000));
    }

    #[test]
    fn test_config_merge_does_not_clear_unsafe() {
        let mut base = Config::default();
        base.update.allow_unsafe = true;
        base.merge(Config::default());
        assert!(base.update.allow_unsafe);
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyACM1"

[update]
erase_key = 0x5A
base_address = 0x1800
unsafe = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.update.erase_key, Some(0x5A));
        assert_eq!(config.update.base_address, Some(0x1800));
        assert!(config.update.allow_unsafe);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(!config.update.allow_unsafe);
    }

    #[test]
    fn test_erase_key_must_fit_a_byte() {
        assert!(toml::from_str::<Config>("[update]\nerase_key = 256\n").is_err());
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otl866.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "COM7"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("COM7"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path_names_app() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("otl866"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }
}
