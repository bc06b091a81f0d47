//! Engine Configuration
//!
//! Settings consumed once at bootstrap. Loaded from YAML:
//!
//! ```yaml
//! init_level: create_and_seed
//! flow_execution_pool_size: 4
//! job_pool_size: 2
//! data_reserve_days: 30
//! data_source:
//!   type: sqlite
//!   path: /var/lib/flowrunner/flowrunner.db
//! mail:
//!   host: smtp.example.com
//!   sender: flowrunner@example.com
//!   admins: [ops@example.com]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// What to do with the database schema when an engine starts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InitLevel {
    /// Leave the database untouched
    #[default]
    Skip,
    /// Create tables, then load seed data
    CreateAndSeed,
    /// Only load seed data into existing tables
    SeedOnly,
}

/// Where flows and executions are persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSourceConfig {
    /// SQLite database file
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_pool_max_size")]
        pool_max_size: u32,
    },
    /// Process-local store, lost on exit
    Memory,
}

impl DataSourceConfig {
    /// Key identifying the database for one-time schema bootstrap.
    ///
    /// In-memory stores are never shared, so they have no key.
    pub fn bootstrap_key(&self) -> Option<String> {
        match self {
            Self::Sqlite { path, .. } => Some(
                fs::canonicalize(path)
                    .unwrap_or_else(|_| path.clone())
                    .display()
                    .to_string(),
            ),
            Self::Memory => None,
        }
    }
}

/// Mail settings for failure and operator notifications.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MailConfig {
    pub host: String,
    pub sender: String,
    /// Login handed to the mail transport
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Recipients of serious-error notifications
    #[serde(default)]
    pub admins: Vec<String>,
}

/// Complete engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub init_level: InitLevel,

    /// Worker threads running whole flow executions
    #[serde(default = "default_pool_size")]
    pub flow_execution_pool_size: usize,

    /// Worker threads per flow execution for its jobs
    #[serde(default = "default_pool_size")]
    pub job_pool_size: usize,

    pub data_source: DataSourceConfig,

    /// Executions older than this many days are purged at bootstrap (0 keeps all)
    #[serde(default)]
    pub data_reserve_days: u32,

    #[serde(default)]
    pub mail: Option<MailConfig>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Pause applied after each dequeue before the duplicate check
    #[serde(default)]
    pub dispatch_delay_ms: u64,
}

fn default_pool_size() -> usize {
    num_cpus::get()
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the data source.
    pub fn new(data_source: DataSourceConfig) -> Self {
        Self {
            init_level: InitLevel::default(),
            flow_execution_pool_size: default_pool_size(),
            job_pool_size: default_pool_size(),
            data_source,
            data_reserve_days: 0,
            mail: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            dispatch_delay_ms: 0,
        }
    }

    /// In-memory configuration, mostly useful for embedding and tests.
    pub fn in_memory() -> Self {
        Self::new(DataSourceConfig::Memory)
    }

    pub fn with_init_level(mut self, init_level: InitLevel) -> Self {
        self.init_level = init_level;
        self
    }

    pub fn with_pool_sizes(mut self, flow_executions: usize, jobs: usize) -> Self {
        self.flow_execution_pool_size = flow_executions;
        self.job_pool_size = jobs;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Loads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        debug!("Config loaded from {} ({} bytes)", path.display(), content.len());
        Self::from_yaml_str(&content)
    }

    /// Parses and validates a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required setting is present and usable.
    pub fn validate(&self) -> Result<()> {
        if self.flow_execution_pool_size == 0 {
            return Err(EngineError::Config(
                "flow_execution_pool_size must be at least 1".into(),
            ));
        }
        if self.job_pool_size == 0 {
            return Err(EngineError::Config("job_pool_size must be at least 1".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(EngineError::Config(
                "heartbeat_interval_ms must be greater than 0".into(),
            ));
        }

        if let DataSourceConfig::Sqlite { path, pool_max_size } = &self.data_source {
            if path.as_os_str().is_empty() {
                return Err(EngineError::Config("data_source.path is required".into()));
            }
            if *pool_max_size == 0 {
                return Err(EngineError::Config(
                    "data_source.pool_max_size must be at least 1".into(),
                ));
            }
        }

        if let Some(mail) = &self.mail {
            if mail.host.trim().is_empty() {
                return Err(EngineError::Config("mail.host is required".into()));
            }
            if mail.sender.trim().is_empty() {
                return Err(EngineError::Config("mail.sender is required".into()));
            }
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Delay before each dispatch decision, if one is configured.
    pub fn dispatch_delay(&self) -> Option<Duration> {
        (self.dispatch_delay_ms > 0).then(|| Duration::from_millis(self.dispatch_delay_ms))
    }
}
