//! Configuration loading and validation

use meshlight_access::SimulatedDevice;
use meshlight_core::{ModelId, NodeConfig, UnicastAddress};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Highest address usable as a unicast address
const MAX_UNICAST: u16 = 0x7fff;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Node address {0} is not a unicast address")]
    InvalidAddress(UnicastAddress),
    #[error("Node {0} is configured more than once")]
    DuplicateNode(UnicastAddress),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
    /// Devices populating the in-memory mesh
    #[serde(default, rename = "simulated_device")]
    pub simulated_devices: Vec<SimulatedDevice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Application key index the light models are bound to
    #[serde(default)]
    pub app_key_index: u16,
}

impl Config {
    /// Check node addresses are valid unicast addresses and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            let address = node.unicast;
            if address.as_u16() == 0 || address.as_u16() > MAX_UNICAST {
                return Err(ConfigError::InvalidAddress(address));
            }
            if !seen.insert(address) {
                return Err(ConfigError::DuplicateNode(address));
            }
        }
        Ok(())
    }
}

/// Load configuration from file, or defaults if the file does not exist
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), nodes = config.nodes.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save an example configuration with one simulated light
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let address = UnicastAddress(0x0010);
    let mut node = NodeConfig::new(address);
    node.name = Some("desk-lamp".to_string());

    let config = Config {
        daemon: DaemonConfig::default(),
        nodes: vec![node],
        simulated_devices: vec![SimulatedDevice::new(
            address,
            vec![
                ModelId::CONFIG_SERVER,
                ModelId::GENERIC_ONOFF_SERVER,
                ModelId::LIGHT_LIGHTNESS_SERVER,
                ModelId::LIGHT_CTL_SERVER,
            ],
        )],
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlight_core::TemperatureEncoding;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.nodes.is_empty());
        assert_eq!(config.daemon.app_key_index, 0);
    }

    #[test]
    fn test_load_nodes_and_devices() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[daemon]
app_key_index = 2

[[node]]
name = "hall"
unicast = 0x0010
mireds_min = 153
mireds_max = 370
temperature_encoding = "vendor_level"

[[node]]
unicast = 0x0020

[[simulated_device]]
unicast = 0x0010
models = [0x0000, 0x1000, 0x1300, 0x1303]
reachable = false
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.daemon.app_key_index, 2);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].display_name(), "hall");
        assert_eq!(config.nodes[0].temperature_encoding, TemperatureEncoding::VendorLevel);
        assert_eq!(config.nodes[1].mireds_max, 1250);

        let device = &config.simulated_devices[0];
        assert!(device.models.contains(&ModelId::LIGHT_CTL_SERVER));
        assert!(!device.reachable);
        assert!(device.has_composition);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[node]]\nunicast = 5\n\n[[node]]\nunicast = 5\n").unwrap();

        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::DuplicateNode(UnicastAddress(5)))
        ));
    }

    #[test]
    fn test_group_address_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[node]]\nunicast = 0xc000\n").unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[node]]\nname = \"no address\"\n").unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshlight.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.simulated_devices.len(), 1);
        assert_eq!(config.nodes[0].unicast, config.simulated_devices[0].unicast);
    }
}
