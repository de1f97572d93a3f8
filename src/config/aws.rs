use serde::{Deserialize, Serialize};

/// Connection settings shared by the AWS-backed adapters.
///
/// Credentials always come from the default provider chain (environment,
/// profile, instance role).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsClientConfig {
    /// AWS region. Falls back to the SDK's region resolution when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Override the service endpoint (LocalStack, VPC endpoints).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}
