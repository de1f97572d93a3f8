use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Tag interpretation and grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Whole calendar days a volume must stay tracked and approved before
    /// it is deleted. Must be at least 1.
    /// Default: 1
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,

    /// `Delete` tag values that count as approval, compared exactly (no
    /// trimming or case folding). `DoNotDelete` exempts on presence alone,
    /// whatever its value.
    #[serde(default = "default_truthy_values")]
    pub truthy_values: Vec<String>,

    /// Value written to the `TagUpdatedBy` tag when a volume is marked.
    #[serde(default = "default_updated_by")]
    pub updated_by: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            truthy_values: default_truthy_values(),
            updated_by: default_updated_by(),
        }
    }
}

impl PolicyConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_period_days == 0 {
            return Err(ConfigError::Validation(
                "policy.grace_period_days must be at least 1; a zero grace period would \
                 delete volumes in the same pass that marks them"
                    .into(),
            ));
        }
        if self.truthy_values.iter().all(|v| v.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "policy.truthy_values must contain at least one non-empty value".into(),
            ));
        }
        if self.updated_by.trim().is_empty() {
            return Err(ConfigError::Validation(
                "policy.updated_by must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_grace_period_days() -> u32 {
    1
}

fn default_truthy_values() -> Vec<String> {
    vec!["true".into(), "True".into(), "1".into()]
}

fn default_updated_by() -> String {
    "Cleanup".into()
}
