//! Tracking store backend configuration.
//!
//! # Example
//!
//! ```toml
//! [tracking]
//! type = "dynamodb"
//! table_name = "cleanup"
//! region = "ap-south-1"
//! ```

use serde::{Deserialize, Serialize};

use super::{AwsClientConfig, ConfigError};

/// Where first-seen timestamps are kept between passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingConfig {
    /// DynamoDB table keyed by `volumeId` - requires `aws` feature.
    #[serde(rename = "dynamodb")]
    DynamoDb(DynamoDbTrackingConfig),

    /// Redis hash - requires `redis` feature.
    Redis {
        /// Redis URL.
        url: String,
        /// Hash holding one field per tracked volume.
        #[serde(default = "default_redis_key")]
        key: String,
    },

    /// One JSON file per tracked volume under a directory.
    File {
        /// Directory path. Created if missing.
        path: String,
    },

    /// In-process store. Records are lost on exit.
    Memory,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::DynamoDb(DynamoDbTrackingConfig::default())
    }
}

impl TrackingConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::DynamoDb(dynamo) if dynamo.table_name.is_empty() => Err(
                ConfigError::Validation("tracking.table_name must not be empty".into()),
            ),
            Self::Redis { url, .. } if url.is_empty() => Err(ConfigError::Validation(
                "tracking.url must not be empty".into(),
            )),
            Self::File { path } if path.is_empty() => Err(ConfigError::Validation(
                "tracking.path must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamoDbTrackingConfig {
    #[serde(flatten)]
    pub client: AwsClientConfig,

    /// Default: "cleanup"
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

impl Default for DynamoDbTrackingConfig {
    fn default() -> Self {
        Self {
            client: AwsClientConfig::default(),
            table_name: default_table_name(),
        }
    }
}

fn default_table_name() -> String {
    "cleanup".into()
}

fn default_redis_key() -> String {
    "volume-reaper:tracked".into()
}
