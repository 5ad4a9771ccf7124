use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FoldkeysError, FoldkeysResult};

/// Top-level configuration (loaded from foldkeys.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldkeysConfig {
    pub logging: LoggingConfig,
    pub provisioning: ProvisioningConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Device provisioning behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Provision devices on the rayon pool (default: false)
    pub parallel: bool,
    /// Minimum number of devices in one call before the parallel path is used
    pub parallel_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding server halves (the local key server)
    pub key_server: PathBuf,
    /// JSON file mapping users to their device public keys
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            parallel_threshold: 8,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_server: PathBuf::from("~/.local/share/foldkeys/keyserver.json"),
            directory: PathBuf::from("~/.config/foldkeys/directory.json"),
        }
    }
}

impl ProvisioningConfig {
    /// Whether a provisioning call covering `device_count` devices should run in parallel.
    pub fn use_parallel(&self, device_count: usize) -> bool {
        self.parallel && device_count >= self.parallel_threshold.max(1)
    }
}

impl FoldkeysConfig {
    /// Load configuration from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> FoldkeysResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| FoldkeysError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> FoldkeysResult<Self> {
        toml::from_str(content).map_err(|e| FoldkeysError::Config(e.to_string()))
    }
}
