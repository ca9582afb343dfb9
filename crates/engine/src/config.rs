//! Engine configuration
//!
//! Loaded from TOML or assembled through
//! [`DatabaseBuilder`](crate::DatabaseBuilder). Every field has a default,
//! so an empty document is a valid configuration.
//!
//! ```toml
//! replication = "push"
//! max_commit_retries = 16
//! cleaner_interval_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use versa_concurrency::TransactionLimits;
use versa_core::{Error, Result};

/// How a process discovers commits made by its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Query the durable change log on every catch-up
    #[default]
    Polling,
    /// Apply commit broadcasts, querying the log only to bridge gaps
    Push,
}

/// Tunables of one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Replication strategy
    pub replication: ReplicationMode,
    /// Attempts made by `with_transaction` before surfacing a conflict
    pub max_commit_retries: u32,
    /// Reads above which a commit logs a warning
    pub read_warn_threshold: u64,
    /// Writes above which a commit logs a warning
    pub write_warn_threshold: usize,
    /// Wait for the cluster commit lock
    pub cluster_lock_timeout_ms: u64,
    /// Wait for server 0 to finish bootstrap
    pub startup_timeout_ms: u64,
    /// Rounds of class registration before giving up on a racing peer
    pub class_registration_attempts: u32,
    /// Change-log cleaner period; disabled when absent
    pub cleaner_interval_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationMode::Polling,
            max_commit_retries: 32,
            read_warn_threshold: 10_000_000,
            write_warn_threshold: 100_000,
            cluster_lock_timeout_ms: 30_000,
            startup_timeout_ms: 60_000,
            class_registration_attempts: 16,
            cleaner_interval_secs: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_commit_retries == 0 {
            return Err(Error::Config("max_commit_retries must be at least 1".into()));
        }
        if self.class_registration_attempts == 0 {
            return Err(Error::Config(
                "class_registration_attempts must be at least 1".into(),
            ));
        }
        if self.cleaner_interval_secs == Some(0) {
            return Err(Error::Config("cleaner_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Cluster lock timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster_lock_timeout_ms)
    }

    /// Startup barrier timeout
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Cleaner period, if enabled
    pub fn cleaner_interval(&self) -> Option<Duration> {
        self.cleaner_interval_secs.map(Duration::from_secs)
    }

    /// Large-transaction thresholds
    pub fn limits(&self) -> TransactionLimits {
        TransactionLimits {
            read_warn: self.read_warn_threshold,
            write_warn: self.write_warn_threshold,
        }
    }
}
