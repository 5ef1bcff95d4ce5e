//! Runtime configuration
//!
//! Every field is optional; unset fields fall back to what the backend
//! reports.
//!
//! | Variable                 | Field            |
//! |--------------------------|------------------|
//! | `OFFLOAD_GROUP_COUNT`    | `group_count`    |
//! | `OFFLOAD_WORKER_THREADS` | `worker_threads` |
//! | `OFFLOAD_TARGET`         | `target`         |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Dispatch tuning shared by every reduction of an executor
///
/// # Example
///
/// ```rust
/// use offload_core::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{"group_count": 8, "target": "gfxA"}"#).unwrap();
/// assert_eq!(config.group_count, Some(8));
/// assert_eq!(config.worker_threads, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Work groups per dispatch; the backend's parallelism when unset
    pub group_count: Option<usize>,

    /// Dedicated CPU worker threads; the global pool when unset
    pub worker_threads: Option<usize>,

    /// Device target used for image selection; the backend's own when unset
    pub target: Option<String>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group_count(mut self, groups: usize) -> Self {
        self.group_count = Some(groups);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Read the configuration from `OFFLOAD_*` environment variables
    ///
    /// Unset or empty variables leave the field unset.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            group_count: env_count("OFFLOAD_GROUP_COUNT")?,
            worker_threads: env_count("OFFLOAD_WORKER_THREADS")?,
            target: env_value("OFFLOAD_TARGET"),
        };
        tracing::debug!(?config, "runtime configuration from environment");
        Ok(config)
    }

    /// Parse the configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero counts
    pub fn validate(&self) -> Result<()> {
        if self.group_count == Some(0) {
            return Err(Error::Config("group_count must be at least 1".into()));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::Config("worker_threads must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn env_count(name: &str) -> Result<Option<usize>> {
    let Some(value) = env_value(name) else {
        return Ok(None);
    };
    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("{name} must be a positive integer, got {value:?}"))),
        Ok(count) => Ok(Some(count)),
    }
}
