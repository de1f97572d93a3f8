//! Shared AWS SDK configuration loading.
//!
//! Uses the standard credential chain (environment, profile, instance role).

use crate::config::AwsClientConfig;

/// Load the SDK config for one AWS client, honouring an explicit region.
pub async fn load_sdk_config(config: &AwsClientConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::from_env();

    if let Some(region) = &config.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }

    loader.load().await
}
