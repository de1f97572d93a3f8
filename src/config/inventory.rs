//! Volume inventory backend configuration.
//!
//! # Example
//!
//! ```toml
//! [inventory]
//! type = "aws"
//! region = "ap-south-1"
//! ```

use serde::{Deserialize, Serialize};

use super::{AwsClientConfig, ConfigError};

/// Where volumes are listed, tagged and deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryConfig {
    /// EC2 block storage - requires `aws` feature.
    Aws(AwsInventoryConfig),

    /// In-process inventory. Starts empty; useful for local trials.
    Memory,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self::Aws(AwsInventoryConfig::default())
    }
}

impl InventoryConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if let Self::Aws(aws) = self
            && !(5..=500).contains(&aws.page_size)
        {
            return Err(ConfigError::Validation(format!(
                "inventory.page_size must be between 5 and 500, got {}",
                aws.page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsInventoryConfig {
    #[serde(flatten)]
    pub client: AwsClientConfig,

    /// Volumes requested per `DescribeVolumes` page.
    /// Default: 100
    #[serde(default = "default_page_size")]
    pub page_size: i32,
}

impl Default for AwsInventoryConfig {
    fn default() -> Self {
        Self {
            client: AwsClientConfig::default(),
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> i32 {
    100
}
