//! Configuration for the `ms` binary
//!
//! The store directory is resolved as: `--store` flag, then the
//! `FEDNEST_MODEL_DIR` environment variable, then `store_dir` from the config
//! file, then the fednestd default (`<data_local_dir>/fednestd/models`), so
//! `ms` and a local coordinator look at the same objects out of the box.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment override for the store directory
pub const STORE_DIR_ENV: &str = "FEDNEST_MODEL_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Model store directory; a leading `~/` is expanded
    pub store_dir: Option<String>,
}

fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fednestd")
        .join("models")
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl Config {
    /// Load the config file: explicit path, `./.modelstore.yml`, then `<config_dir>/modelstore/config.yml`
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path)
                .context(format!("Failed to load config from {}", config_path.display()));
        }

        let candidates = [
            Some(PathBuf::from(".modelstore.yml")),
            dirs::config_dir().map(|p| p.join("modelstore").join("config.yml")),
        ];
        for candidate in candidates.iter().flatten() {
            if candidate.exists() {
                return Self::load_from_file(candidate)
                    .context(format!("Failed to load config from {}", candidate.display()));
            }
        }

        debug!("No modelstore config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")
    }

    /// Pick the store directory, highest priority first
    pub fn resolve_store_dir(&self, cli_override: Option<PathBuf>, env_override: Option<String>) -> PathBuf {
        if let Some(dir) = cli_override {
            return dir;
        }
        if let Some(dir) = env_override.filter(|d| !d.trim().is_empty()) {
            return expand_home(&dir);
        }
        match &self.store_dir {
            Some(dir) => expand_home(dir),
            None => default_store_dir(),
        }
    }
}
