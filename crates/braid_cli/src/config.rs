//! Config file handling.

use braid_cluster::BroadcastConfig;
use braid_sim::SimConfig;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of a `--config` file; missing sections take their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Broadcast settings
    pub broadcast: BroadcastConfig,
    /// Simulator settings
    pub sim: SimConfig,
}

impl FileConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).wrap_err_with(|| format!("parsing config {}", path.display()))
    }

    /// Parse JSON text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
