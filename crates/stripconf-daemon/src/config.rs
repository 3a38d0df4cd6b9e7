//! Configuration loading and defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stripconf_core::{ConfigDbParams, Partition, XmlFileSet};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Partition and backend selection
    #[serde(flatten)]
    pub params: ConfigDbParams,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Pretty-print JSON summaries
    #[serde(default = "default_true")]
    pub pretty: bool,
    /// Include the list of FED ids in summaries
    #[serde(default)]
    pub fed_ids: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            fed_ids: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Load configuration from file
///
/// A missing file yields database mode with credentials taken from the
/// environment.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.params.mode()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let data = default_data_dir();
    let config = Config {
        params: ConfigDbParams {
            partition: Partition::new("TI_27-JAN-2007_1", 0, 0),
            database: None,
            files: Some(XmlFileSet {
                input_module: data.join("module.xml"),
                input_dcuinfo: data.join("dcuinfo.xml"),
                input_fec: vec![data.join("fec.xml")],
                input_fed: vec![data.join("fed.xml")],
                ..Default::default()
            }),
        },
        report: ReportConfig::default(),
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
