//! YAML configuration

use std::fs;

use serde::Deserialize;

use crate::sources::{FieldsConfiguration, PositionOptions};
use crate::storage::DEFAULT_HISTORY_CAP;
use crate::TrackingTuning;

/// File name looked up in the working and home directories
pub const CONFIG_FILE_NAME: &str = ".ridetrack.yaml";

/// Which backend receives the positions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// In-process fallback store
    #[default]
    Local,
    /// MongoDB collection
    Remote,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub keep_history: bool,
    pub history_cap: usize,
    /// YAML file backing the local store, in-memory when unset
    pub local_path: Option<String>,
    pub mongo_uri: Option<String>,
    pub mongo_database: Option<String>,
    pub mongo_collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            keep_history: false,
            history_cap: DEFAULT_HISTORY_CAP,
            local_path: None,
            mongo_uri: None,
            mongo_database: None,
            mongo_collection: "locations".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configs {
    pub fields: FieldsConfiguration,
    pub tuning: TrackingTuning,
    pub position: PositionOptions,
    pub storage: StorageConfig,
}

impl Configs {
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Invalid configuration: {}", e))
    }
}

/// First candidate file that reads and parses, defaults otherwise
pub fn load_configs(candidates: &[String]) -> Configs {
    for candidate in candidates {
        if let Ok(s) = fs::read_to_string(candidate) {
            if let Ok(conf) = Configs::from_yaml(&s) {
                return conf;
            }
        }
    }

    Configs::default()
}
