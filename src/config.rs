//! Configuration file parsing
//!
//! Parses the node-local TOML settings shared by both agents. Every section
//! and key is optional; a missing file means built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "LIO_AGENTS_CONFIG";

/// Settings file used when it exists and `LIO_AGENTS_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lio-agents.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Agent settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub configfs: ConfigfsConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control tree location
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigfsConfig {
    /// Mount point of configfs
    #[serde(default = "default_configfs_root")]
    pub root: PathBuf,
}

impl Default for ConfigfsConfig {
    fn default() -> Self {
        ConfigfsConfig {
            root: default_configfs_root(),
        }
    }
}

fn default_configfs_root() -> PathBuf {
    PathBuf::from(crate::configfs::fs::DEFAULT_CONFIGFS_ROOT)
}

/// ALUA promote/demote pacing
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotionConfig {
    /// Delay between state polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep after a failed transition, so the cluster manager backs off
    #[serde(default = "default_failure_penalty_secs")]
    pub failure_penalty_secs: u64,

    /// Upper bound on polls per transition
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        PromotionConfig {
            poll_interval_ms: default_poll_interval_ms(),
            failure_penalty_secs: default_failure_penalty_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PromotionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn failure_penalty(&self) -> Duration {
        Duration::from_secs(self.failure_penalty_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_failure_penalty_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    120
}

/// Cluster manager integration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Command used to set or withdraw the master score
    #[serde(default = "default_crm_master")]
    pub crm_master: String,

    /// Master score per ALUA group member
    #[serde(default = "default_score_per_member")]
    pub score_per_member: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            crm_master: default_crm_master(),
            score_per_member: default_score_per_member(),
        }
    }
}

fn default_crm_master() -> String {
    crate::system::crm::CRM_MASTER.to_string()
}

fn default_score_per_member() -> u32 {
    1000
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `LIO_AGENTS_CONFIG`, else the default path if present,
    /// else use defaults
    pub fn discover() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Config::default()),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.promotion.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "promotion.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.promotion.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "promotion.max_attempts must be greater than zero".to_string(),
            ));
        }

        if self.cluster.crm_master.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cluster.crm_master must not be empty".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.configfs.root, Path::new("/sys/kernel/config"));
        assert_eq!(config.promotion.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.promotion.failure_penalty(), Duration::from_secs(15));
        assert_eq!(config.promotion.max_attempts, 120);
        assert_eq!(config.cluster.crm_master, "crm_master");
        assert_eq!(config.cluster.score_per_member, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[configfs]
root = "/mnt/configfs"

[promotion]
poll_interval_ms = 250
failure_penalty_secs = 5
max_attempts = 20

[cluster]
crm_master = "/usr/sbin/crm_master"
score_per_member = 10

[logging]
level = "debug"
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.configfs.root, Path::new("/mnt/configfs"));
        assert_eq!(config.promotion.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.promotion.max_attempts, 20);
        assert_eq!(config.cluster.crm_master, "/usr/sbin/crm_master");
        assert_eq!(config.cluster.score_per_member, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values() {
        let zero = "[promotion]\nmax_attempts = 0\n";
        assert!(matches!(Config::parse(zero), Err(ConfigError::Invalid(_))));

        let interval = "[promotion]\npoll_interval_ms = 0\n";
        assert!(matches!(Config::parse(interval), Err(ConfigError::Invalid(_))));

        let command = "[cluster]\ncrm_master = \" \"\n";
        assert!(matches!(Config::parse(command), Err(ConfigError::Invalid(_))));

        let level = "[logging]\nlevel = \"loud\"\n";
        assert!(matches!(Config::parse(level), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = Config::parse("[promotion]\npoll_interval = 5\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[configfs]\nroot = \"/tmp/cfg\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.configfs.root, Path::new("/tmp/cfg"));

        assert!(matches!(
            Config::load("/nonexistent/lio-agents.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
