//! Reconciler scheduling and safety configuration.
//!
//! # Example
//!
//! ```toml
//! [reconciler]
//! interval_hours = 24
//! concurrency = 8
//! pass_timeout_secs = 900
//! dry_run = false
//! max_deletes_per_run = 50
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Controls how passes run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilerConfig {
    /// How often the worker runs a pass (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Maximum tracked volumes validated at the same time.
    /// Default: 8
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Abort a pass that runs longer than this. The partial summary is
    /// still published. Set to 0 to disable.
    /// Default: 900 (15 minutes)
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,

    /// If true, log which volumes would be deleted without deleting them.
    /// Volumes are still marked and tracked.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of volumes deleted per pass. Mature volumes over the
    /// cap stay tracked for the next pass.
    /// Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_deletes_per_run: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            concurrency: default_concurrency(),
            pass_timeout_secs: default_pass_timeout_secs(),
            dry_run: false,
            max_deletes_per_run: 0,
        }
    }
}

impl ReconcilerConfig {
    /// Get the worker interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    /// Get the pass timeout, if one is configured.
    pub fn pass_timeout(&self) -> Option<Duration> {
        (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs))
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "reconciler.interval_hours must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "reconciler.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_interval_hours() -> u64 {
    24
}

fn default_concurrency() -> usize {
    8
}

fn default_pass_timeout_secs() -> u64 {
    900
}
