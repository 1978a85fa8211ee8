use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the optional per-project defaults file
pub const CONFIG_FILE_NAME: &str = ".start-test.json";

/// Project-wide defaults read from `.start-test.json`.
///
/// Only options that describe the machine or the project belong here; run
/// selection (futures, performance, graphs) always comes from the command
/// line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProjectDefaults {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compopts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub execopts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_cmd: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preexec: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prediff: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_locales: Option<u32>,
}

impl ProjectDefaults {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let defaults = serde_json::from_str(&contents).map_err(|e| {
            Error::ConfigError(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(defaults)
    }

    /// Look for a defaults file in `start_path` and its ancestors
    pub fn find_config_file(start_path: &Path) -> Option<PathBuf> {
        start_path
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load the nearest defaults file, if there is one
    pub fn discover(start_path: &Path) -> Result<Option<Self>> {
        match Self::find_config_file(start_path) {
            Some(path) => {
                tracing::debug!("Loading project defaults from {}", path.display());
                Self::load_from_file(&path).map(Some)
            }
            None => Ok(None),
        }
    }
}
