//! AWS EC2 volume inventory.
//!
//! Unattached EBS volumes are the ones EC2 reports with status `available`.

use async_trait::async_trait;
use aws_sdk_ec2::{
    Client,
    error::{ProvideErrorMetadata, SdkError},
    types::{Filter, Tag, VolumeState},
};
use tracing::instrument;

use super::{
    DeletionMark, InventoryError, InventoryResult, MARK_TAG_KEYS, VolumeCandidate, VolumeInventory,
};
use crate::{config::AwsInventoryConfig, policy::TagSet};

/// Error codes meaning the volume id does not resolve to a volume.
const NOT_FOUND_CODES: [&str; 2] = ["InvalidVolume.NotFound", "InvalidVolumeID.Malformed"];
/// Error codes meaning the volume exists but cannot be deleted right now.
const REJECTED_CODES: [&str; 2] = ["VolumeInUse", "IncorrectState"];

/// EC2-backed volume inventory.
pub struct AwsEc2Inventory {
    client: Client,
    page_size: i32,
}

impl AwsEc2Inventory {
    pub async fn new(config: &AwsInventoryConfig) -> Self {
        let sdk_config = crate::aws::load_sdk_config(&config.client).await;

        let mut ec2_config = aws_sdk_ec2::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = &config.client.endpoint_url {
            ec2_config = ec2_config.endpoint_url(endpoint_url);
        }

        Self {
            client: Client::from_conf(ec2_config.build()),
            page_size: config.page_size,
        }
    }

    pub fn from_client(client: Client, page_size: i32) -> Self {
        Self { client, page_size }
    }
}

fn tags_from_sdk(tags: &[Tag]) -> TagSet {
    tags.iter()
        .filter_map(|t| Some((t.key()?, t.value().unwrap_or_default())))
        .collect()
}

fn sdk_tag(key: &str, value: Option<&str>) -> Tag {
    let builder = Tag::builder().key(key);
    match value {
        Some(value) => builder.value(value).build(),
        None => builder.build(),
    }
}

/// Map an SDK error, distinguishing "volume gone" from an outage.
fn classify_error<E, R>(volume_id: &str, operation: &str, err: SdkError<E, R>) -> InventoryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some(code) if NOT_FOUND_CODES.contains(&code) => {
            InventoryError::VolumeNotFound(volume_id.to_string())
        }
        Some(code) if REJECTED_CODES.contains(&code) => InventoryError::DeleteRejected {
            volume_id: volume_id.to_string(),
            reason: err.message().unwrap_or(code).to_string(),
        },
        _ => InventoryError::Unavailable(format!(
            "{operation} failed for {volume_id}: {}",
            aws_sdk_ec2::error::DisplayErrorContext(&err)
        )),
    }
}

#[async_trait]
impl VolumeInventory for AwsEc2Inventory {
    #[instrument(skip(self))]
    async fn list_unattached_candidates(&self) -> InventoryResult<Vec<VolumeCandidate>> {
        let mut pages = self
            .client
            .describe_volumes()
            .filters(
                Filter::builder()
                    .name("status")
                    .values(VolumeState::Available.as_str())
                    .build(),
            )
            .max_results(self.page_size)
            .into_paginator()
            .send();

        let mut candidates = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                InventoryError::Unavailable(format!(
                    "DescribeVolumes failed: {}",
                    aws_sdk_ec2::error::DisplayErrorContext(&e)
                ))
            })?;

            for volume in page.volumes() {
                let Some(volume_id) = volume.volume_id() else {
                    continue;
                };
                candidates.push(VolumeCandidate {
                    volume_id: volume_id.to_string(),
                    tags: tags_from_sdk(volume.tags()),
                });
            }
        }

        tracing::debug!(count = candidates.len(), "Listed unattached volumes");
        Ok(candidates)
    }

    #[instrument(skip(self))]
    async fn get_tags(&self, volume_id: &str) -> InventoryResult<TagSet> {
        let output = self
            .client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .map_err(|e| classify_error(volume_id, "DescribeVolumes", e))?;

        output
            .volumes()
            .iter()
            .find(|v| v.volume_id() == Some(volume_id))
            .map(|v| tags_from_sdk(v.tags()))
            .ok_or_else(|| InventoryError::VolumeNotFound(volume_id.to_string()))
    }

    #[instrument(skip(self, mark))]
    async fn apply_deletion_mark_tags(
        &self,
        volume_id: &str,
        mark: &DeletionMark,
    ) -> InventoryResult<()> {
        let tags: Vec<Tag> = mark
            .tags()
            .iter()
            .map(|(key, value)| sdk_tag(key, Some(value)))
            .collect();

        self.client
            .create_tags()
            .resources(volume_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_error(volume_id, "CreateTags", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_deletion_mark_tags(&self, volume_id: &str) -> InventoryResult<()> {
        let tags: Vec<Tag> = MARK_TAG_KEYS.iter().map(|key| sdk_tag(key, None)).collect();

        self.client
            .delete_tags()
            .resources(volume_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_error(volume_id, "DeleteTags", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &str) -> InventoryResult<()> {
        self.client
            .delete_volume()
            .volume_id(volume_id)
            .send()
            .await
            .map_err(|e| classify_error(volume_id, "DeleteVolume", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_from_sdk_skips_keyless() {
        let tags = tags_from_sdk(&[
            Tag::builder().key("Delete").value("true").build(),
            Tag::builder().key("DoNotDelete").build(),
            Tag::builder().value("orphan").build(),
        ]);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("Delete"), Some("true"));
        assert_eq!(tags.get("DoNotDelete"), Some(""));
    }
}
