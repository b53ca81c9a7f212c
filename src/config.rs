//! Configuration for elohim-quests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elohim-quests")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on the SQLite write lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Base URL of the group membership service.
    /// When unset, membership is answered from `groups` below.
    #[serde(default)]
    pub membership_url: Option<String>,

    /// Base URL of the reward ledger gateway.
    /// When unset, settlement attempts are recorded as failed.
    #[serde(default)]
    pub ledger_url: Option<String>,

    /// Upper bound on a single ledger transfer call
    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_secs: u64,

    /// Run settlement on a background task instead of inside the verify request
    #[serde(default = "default_true")]
    pub settlement_in_background: bool,

    /// Currency tag used when a quest does not name one
    #[serde(default = "default_reward_currency")]
    pub default_reward_currency: String,

    /// Static group membership (group id -> member user ids)
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
}

fn default_database_file() -> String {
    "quests.db".to_string()
}

fn default_http_port() -> u16 {
    8095
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_settlement_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_reward_currency() -> String {
    "ETH".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            http_port: default_http_port(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            membership_url: None,
            ledger_url: None,
            settlement_timeout_secs: default_settlement_timeout(),
            settlement_in_background: true,
            default_reward_currency: default_reward_currency(),
            groups: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            http_port = 9000
            ledger_url = "http://ledger.local"

            [groups]
            hikers = ["alice", "bob"]
            "#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger.local"));
        assert_eq!(config.pool_size, 8);
        assert!(config.settlement_in_background);
        assert_eq!(config.groups["hikers"], vec!["alice", "bob"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.settlement_timeout_secs = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.settlement_timeout_secs, 3);
        assert_eq!(loaded.database_file, "quests.db");
    }
}
