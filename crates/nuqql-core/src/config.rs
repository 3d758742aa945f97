use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which per-conversation statistic drives the recency part of the sort
/// order in the conversation list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortStatistic {
    #[serde(rename = "last-send")]
    #[default]
    LastSend,
    #[serde(rename = "last-used")]
    LastUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, rename = "log-level", alias = "log_level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, rename = "sort-statistic", alias = "sort_statistic")]
    pub sort_statistic: SortStatistic,

    /// Percent of the terminal width given to the conversation list pane.
    #[serde(default = "default_list_ratio", rename = "list-ratio", alias = "list_ratio")]
    pub list_ratio: u16,

    /// Show conversations whose peer is offline even without notifications.
    #[serde(default, rename = "show-offline", alias = "show_offline")]
    pub show_offline: bool,

    /// Extra directory searched for backend executables, in addition to PATH.
    #[serde(default, rename = "backend-dir", alias = "backend_dir", skip_serializing_if = "Option::is_none")]
    pub backend_dir: Option<PathBuf>,

    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            log_level: None,
            sort_statistic: SortStatistic::default(),
            list_ratio: default_list_ratio(),
            show_offline: false,
            backend_dir: None,
            extra: BTreeMap::new(),
        }
    }
}

fn default_list_ratio() -> u16 {
    25
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("list-ratio must be between 10 and 80, got {ratio}")]
    InvalidListRatio { ratio: u16 },
}

impl ConfigFile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=80).contains(&self.list_ratio) {
            return Err(ConfigError::InvalidListRatio {
                ratio: self.list_ratio,
            });
        }
        Ok(())
    }

    /// Load and validate the config file. A missing file is the default
    /// configuration, not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source: err,
                })
            }
        };

        let config: ConfigFile = toml::from_str(&data).map_err(|err| ConfigError::Parse {
            path: path.to_owned(),
            source: err,
        })?;
        config.validate()?;
        Ok(config)
    }
}
