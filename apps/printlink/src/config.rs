//! Demo configuration.
//!
//! Stored as TOML at `<config dir>/printlink/config.toml`, created with
//! defaults on first run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use printlink_protocol::constants::{BUFFERED_HIGH_WATER, CHUNK_SIZE};
use printlink_receiver::ReceiverConfig;
use printlink_sender::SenderConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintlinkConfig {
    /// Name the customer side presents to the shop.
    #[serde(default)]
    pub display_name: String,

    /// Key-value store file. Unset uses the default location.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Where batch exports are written.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Spool directory approved print jobs are written to.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("printlink-exports")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("printlink-spool")
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_high_water_mark() -> usize {
    BUFFERED_HIGH_WATER
}

impl Default for PrintlinkConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            store_path: None,
            export_dir: default_export_dir(),
            spool_dir: default_spool_dir(),
            chunk_size: default_chunk_size(),
            high_water_mark: default_high_water_mark(),
        }
    }
}

impl PrintlinkConfig {
    /// Loads the configuration, writing the defaults if the file is missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn sender(&self) -> SenderConfig {
        let mut config = SenderConfig::default();
        if self.chunk_size > 0 {
            config.stream.chunk_size = self.chunk_size;
        }
        if self.high_water_mark > 0 {
            config.stream.high_water_mark = self.high_water_mark;
        }
        config
    }

    pub fn receiver(&self) -> ReceiverConfig {
        ReceiverConfig {
            print_on_complete: true,
            export_dir: Some(self.export_dir.clone()),
        }
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    let dir = printlink_store::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no configuration directory available"))?;
    Ok(dir.join("printlink").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_protocol_constants() {
        let config = PrintlinkConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.high_water_mark, 512 * 1024);
        assert_eq!(config.sender().stream.chunk_size, 64 * 1024);
        assert!(config.receiver().print_on_complete);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: PrintlinkConfig = toml::from_str(r#"display_name = "Ana""#).unwrap();
        assert_eq!(config.display_name, "Ana");
        assert_eq!(config.spool_dir, PathBuf::from("printlink-spool"));
        assert!(config.store_path.is_none());
    }

    #[test]
    fn zero_sizes_keep_engine_defaults() {
        let config = PrintlinkConfig {
            chunk_size: 0,
            high_water_mark: 0,
            ..PrintlinkConfig::default()
        };
        let sender = config.sender();
        assert_eq!(sender.stream.chunk_size, CHUNK_SIZE);
        assert_eq!(sender.stream.high_water_mark, BUFFERED_HIGH_WATER);
    }

    #[test]
    fn first_load_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("printlink").join("config.toml");

        let created = PrintlinkConfig::load_from(&path).unwrap();
        assert!(path.exists());

        let edited = PrintlinkConfig {
            display_name: "Shop".into(),
            chunk_size: 1024,
            ..created
        };
        edited.save_to(&path).unwrap();
        assert_eq!(PrintlinkConfig::load_from(&path).unwrap(), edited);
    }
}
