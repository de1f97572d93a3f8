//! Cloud volume inventory.
//!
//! Supports multiple backends:
//! - In-memory (for testing and local dry runs)
//! - AWS EC2 - requires `aws` feature

#[cfg(feature = "aws")]
mod aws;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "aws")]
pub use aws::AwsEc2Inventory;
use chrono::{DateTime, SecondsFormat, Utc};
pub use memory::{MemoryInventory, MemoryVolume};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::InventoryConfig,
    policy::{DELETE_MARK_VALUE, DELETE_TAG, TagSet, UPDATED_BY_TAG, UPDATED_ON_TAG},
};

#[derive(Debug, Error)]
pub enum InventoryError {
    /// The volume no longer exists. Expected when someone else deleted it.
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// The provider refused the deletion, e.g. because the volume is attached again.
    #[error("Deletion of volume {volume_id} rejected: {reason}")]
    DeleteRejected { volume_id: String, reason: String },

    /// Transport, throttling or credential failure.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),
}

impl InventoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::VolumeNotFound(_))
    }
}

pub type InventoryResult<T> = Result<T, InventoryError>;

/// An unattached volume as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCandidate {
    pub volume_id: String,
    pub tags: TagSet,
}

/// The tags written onto a volume when it is first marked for deletion.
#[derive(Debug, Clone)]
pub struct DeletionMark {
    pub updated_by: String,
    pub marked_at: DateTime<Utc>,
}

impl DeletionMark {
    pub fn new(updated_by: impl Into<String>, marked_at: DateTime<Utc>) -> Self {
        Self {
            updated_by: updated_by.into(),
            marked_at,
        }
    }

    pub fn tags(&self) -> TagSet {
        TagSet::new()
            .with(DELETE_TAG, DELETE_MARK_VALUE)
            .with(UPDATED_BY_TAG, self.updated_by.clone())
            .with(
                UPDATED_ON_TAG,
                self.marked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
    }
}

/// Tag keys removed when the reaper stops tracking an exempted volume.
pub const MARK_TAG_KEYS: [&str; 2] = [DELETE_TAG, UPDATED_BY_TAG];

/// Access to the provider's volume inventory.
///
/// Implementations must not retry internally; a failed call is retried by the
/// next reconciliation pass.
#[async_trait]
pub trait VolumeInventory: Send + Sync {
    /// List every volume whose status is "unattached", with its tags.
    async fn list_unattached_candidates(&self) -> InventoryResult<Vec<VolumeCandidate>>;

    /// Read the live tags of one volume.
    async fn get_tags(&self, volume_id: &str) -> InventoryResult<TagSet>;

    /// Idempotently write the deletion mark tags.
    async fn apply_deletion_mark_tags(
        &self,
        volume_id: &str,
        mark: &DeletionMark,
    ) -> InventoryResult<()>;

    /// Remove the `Delete` and `TagUpdatedBy` tags written by the reaper.
    async fn clear_deletion_mark_tags(&self, volume_id: &str) -> InventoryResult<()>;

    /// Request deletion of a volume.
    async fn delete_volume(&self, volume_id: &str) -> InventoryResult<()>;
}

/// Create a volume inventory from configuration.
pub async fn create_inventory(config: &InventoryConfig) -> InventoryResult<Arc<dyn VolumeInventory>> {
    let inventory: Arc<dyn VolumeInventory> = match config {
        InventoryConfig::Memory => {
            tracing::warn!("Using in-memory volume inventory; no real volumes will be touched");
            Arc::new(MemoryInventory::new())
        }

        #[cfg(feature = "aws")]
        InventoryConfig::Aws(aws) => Arc::new(AwsEc2Inventory::new(aws).await),
        #[cfg(not(feature = "aws"))]
        InventoryConfig::Aws(_) => {
            return Err(InventoryError::Unavailable(
                "AWS inventory configured but the 'aws' feature is not enabled. \
                Rebuild with: cargo build --features aws"
                    .to_string(),
            ));
        }
    };

    Ok(inventory)
}
