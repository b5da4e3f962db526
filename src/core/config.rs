//! `config/kiosk.toml` loading. Every field has a default, and a missing
//! file means all defaults.

use crate::core::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub currency: String,
    /// Let purchases and payments create records for names not on the roster.
    pub allow_unknown_drinkers: bool,
    pub commit: CommitConfig,
    pub directory: DirectoryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: "€".to_string(),
            allow_unknown_drinkers: false,
            commit: CommitConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Debounce window for coalesced commits.
    pub default_wait_secs: u64,
    pub git: String,
    /// Disable to keep changes local only.
    pub enabled: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            default_wait_secs: 3600,
            git: "git".to_string(),
            enabled: true,
        }
    }
}

impl CommitConfig {
    pub fn default_wait(&self) -> Duration {
        Duration::from_secs(self.default_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// argv of the query; its stdout is the dump.
    pub command: Vec<String>,
    pub expiry_field: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            command: vec!["ldapsearch".to_string(), "-x".to_string()],
            expiry_field: "shadowExpire".to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<LedgerConfig, LedgerError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LedgerConfig::default()),
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&content)
        .map_err(|e| LedgerError::ConfigError(format!("{}: {}", path.display(), e)))
}
