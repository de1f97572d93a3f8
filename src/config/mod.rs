//! Configuration for the volume reaper.
//!
//! The reaper is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [reconciler]
//! concurrency = 8
//!
//! [policy]
//! grace_period_days = 1
//!
//! [inventory]
//! type = "aws"
//! region = "ap-south-1"
//!
//! [tracking]
//! type = "dynamodb"
//! table_name = "cleanup"
//!
//! [notification]
//! type = "sns"
//! topic_arn = "${CLEANUP_TOPIC_ARN}"
//! ```

mod aws;
mod inventory;
mod notification;
mod observability;
mod policy;
mod reconciler;
mod tracking;

use std::path::Path;

pub use aws::*;
pub use inventory::*;
pub use notification::*;
pub use observability::*;
pub use policy::*;
pub use reconciler::*;
use serde::{Deserialize, Serialize};
pub use tracking::*;

/// Root configuration.
///
/// Every section is optional. The defaults target AWS: EC2 inventory, a
/// DynamoDB table named `cleanup`, and summaries written to the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaperConfig {
    /// Pass scheduling and safety limits.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Tag interpretation and grace period.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Volume inventory backend.
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// Tracking store backend.
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Pass summary channel.
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ReaperConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch backends this build can't serve before serde turns them into
        // less helpful errors.
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: ReaperConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.reconciler.validate()?;
        self.policy.validate()?;
        self.inventory.validate()?;
        self.tracking.validate()?;
        self.notification.validate()?;

        if self.reconciler.dry_run && self.reconciler.max_deletes_per_run > 0 {
            tracing::warn!("reconciler.max_deletes_per_run has no effect while dry_run is enabled");
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated backends before typed deserialization.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    let section_type = |section: &str| {
        raw.get(section)
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
    };

    if let Some(type_val) = section_type("inventory") {
        check_backend_feature("inventory", type_val, &mut issues);
    }
    if let Some(type_val) = section_type("tracking") {
        check_backend_feature("tracking", type_val, &mut issues);
    }
    if let Some(type_val) = section_type("notification") {
        check_backend_feature("notification", type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let mut features: Vec<&str> = issues.iter().map(|(_, feat)| *feat).collect();
    features.sort_unstable();
    features.dedup();
    let features = features.join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}\n\
         Or use the 'full' profile: cargo build --features full\n\
         Run 'volume-reaper features' to see all available features."
    )))
}

fn check_backend_feature(_section: &str, type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "aws"))]
        "aws" | "dynamodb" | "sns" => _issues.push((
            format!("{_section} type '{type_val}' requires the 'aws' feature"),
            "aws",
        )),
        #[cfg(not(feature = "redis"))]
        "redis" => _issues.push((
            format!("{_section} type 'redis' requires the 'redis' feature"),
            "redis",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = name.as_str();
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
