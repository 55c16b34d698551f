use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_FIXED_SETTLE_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SERVICE_TIMEOUT_SECS,
    DEFAULT_SETTLE_TIME_SECS,
};
use crate::error::{LiveStackError, Result};
use crate::stack::StackConfig;

/// Session-wide settings plus the defaults for new stacks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait between reserving the processing lock and reading the
    /// directory, letting a burst of writes finish. Skipped on the initial
    /// pass.
    pub settle_time_secs: u64,
    /// Delay applied to every change notification.
    pub fixed_settle_ms: u64,
    /// Re-announce a directory whose cycle lost the processing lock.
    pub rescan_after_contention: bool,
    pub poll_interval_ms: u64,
    /// Deadline for each image-service call; 0 disables it.
    pub service_timeout_secs: u64,
    pub defaults: StackConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_time_secs: DEFAULT_SETTLE_TIME_SECS,
            fixed_settle_ms: DEFAULT_FIXED_SETTLE_MS,
            rescan_after_contention: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            service_timeout_secs: DEFAULT_SERVICE_TIMEOUT_SECS,
            defaults: StackConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn settle_time(&self) -> Duration {
        Duration::from_secs(self.settle_time_secs)
    }

    pub fn fixed_settle(&self) -> Duration {
        Duration::from_millis(self.fixed_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn service_timeout(&self) -> Option<Duration> {
        (self.service_timeout_secs > 0).then(|| Duration::from_secs(self.service_timeout_secs))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(LiveStackError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        self.defaults.validate()
    }
}
