use std::path::{Path, PathBuf};

use pds_sketch::{CardinalType, FilterType};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// ParameterPolicy decides what happens when a filter is declared under an
/// existing (type, key) with a different capacity or error rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterPolicy {
    /// Fail the create with `CatalogError::ParameterConflict`.
    #[default]
    Reject,
    /// Log a warning and catalog the new tuning as its own row.
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// SQLite database file holding the catalog.
    pub database_path: PathBuf,
    /// Remote engine URL, e.g. `redis://127.0.0.1:6379`. Without one the
    /// in-process engine backs remote variants.
    pub remote_url: Option<String>,
    pub parameter_policy: ParameterPolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("pds.db"),
            remote_url: None,
            parameter_policy: ParameterPolicy::default(),
        }
    }
}

impl CatalogConfig {
    /// from_file reads a JSON config; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| CatalogError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&data)
            .map_err(|e| CatalogError::Config(format!("{}: {}", path.display(), e)))
    }

    /// require_engine fails for remote variants when no engine URL is set.
    /// Their state would live in the in-process engine and end with the
    /// process.
    pub fn require_engine(&self, variant: &str) -> Result<()> {
        let remote =
            variant == FilterType::Remote.as_str() || variant == CardinalType::Remote.as_str();
        if remote && self.remote_url.is_none() {
            return Err(CatalogError::Config(format!(
                "{} needs a remote_url, no remote engine is configured",
                variant
            )));
        }
        Ok(())
    }
}
