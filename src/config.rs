use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for the store and its importers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// File the CLI persists the store to between invocations.
    pub store_path: PathBuf,
    /// Directory where ZIP archives are unpacked before import, keyed per
    /// version id underneath.
    pub staging_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("tabvault");
        Self {
            store_path: PathBuf::from("tabvault.store.json"),
            staging_dir: base,
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader).context("Parsing config JSON")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing config JSON")
    }

    /// Staging directory for one version's archive extraction.
    pub fn version_staging(&self, version_id: u64) -> PathBuf {
        self.staging_dir.join(format!("staging_{version_id}"))
    }
}
