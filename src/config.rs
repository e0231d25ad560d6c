use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::fs::write_atomic;

/// on-disk format version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// store configuration stored in config.toml
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// layout version of the data directory
    pub format_version: u32,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub pack: PackConfig,
}

/// snapshot index policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// replace an existing snapshot of the same name instead of failing
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

/// pack manager policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    /// delete loose objects once the pack containing them is confirmed
    #[serde(default = "default_true")]
    pub prune_loose: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        Self { prune_loose: true }
    }
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file, replacing it atomically via `tmp_dir`
    pub fn save(&self, tmp_dir: &Path, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        write_atomic(tmp_dir, path, content.as_bytes())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            snapshots: SnapshotConfig::default(),
            pack: PackConfig::default(),
        }
    }
}
