use crate::FileJournal;
use loomcore::{JournalError, MemoryJournal, RetryPolicy, StepJournal};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the runtime
///
/// ```toml
/// event_buffer_size = 1000
///
/// [retry]
/// max_attempts = 3
/// delay_ms = 1000
///
/// [journal]
/// kind = "file"
/// dir = ".loom/steps"
///
/// [http]
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Policy for nodes that don't carry their own
    pub retry: RetryPolicy,
    pub journal: JournalConfig,
    pub http: HttpSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            retry: RetryPolicy::default(),
            journal: JournalConfig::Memory,
            http: HttpSettings::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "http.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Open the step journal this config describes
    pub async fn open_journal(&self) -> Result<Arc<dyn StepJournal>, JournalError> {
        match &self.journal {
            JournalConfig::Memory => Ok(Arc::new(MemoryJournal::new())),
            JournalConfig::File { dir } => Ok(Arc::new(FileJournal::open(dir.clone()).await?)),
        }
    }
}

/// Where committed step results are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JournalConfig {
    /// Lost on exit; restarts re-run every step
    Memory,
    File { dir: PathBuf },
}

/// Settings for outbound HTTP requests made by nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("loom/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
