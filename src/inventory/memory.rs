use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{
    DeletionMark, InventoryError, InventoryResult, MARK_TAG_KEYS, VolumeCandidate, VolumeInventory,
};
use crate::policy::TagSet;

/// A volume held by [`MemoryInventory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryVolume {
    pub attached: bool,
    pub tags: TagSet,
}

/// In-memory volume inventory.
///
/// Used by tests and local dry runs. Faults can be injected per volume to
/// exercise the reconciler's error paths.
#[derive(Default)]
pub struct MemoryInventory {
    volumes: Arc<DashMap<String, MemoryVolume>>,
    listing_unavailable: AtomicBool,
    unavailable: DashSet<String>,
    reject_delete: DashSet<String>,
    unmark_unavailable: DashSet<String>,
    delete_calls: DashMap<String, u32>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an unattached volume.
    pub fn insert_unattached(&self, volume_id: impl Into<String>, tags: TagSet) {
        self.volumes.insert(
            volume_id.into(),
            MemoryVolume {
                attached: false,
                tags,
            },
        );
    }

    /// Add or replace an attached volume.
    pub fn insert_attached(&self, volume_id: impl Into<String>, tags: TagSet) {
        self.volumes.insert(
            volume_id.into(),
            MemoryVolume {
                attached: true,
                tags,
            },
        );
    }

    /// Remove a volume behind the reaper's back.
    pub fn remove(&self, volume_id: &str) -> Option<MemoryVolume> {
        self.volumes.remove(volume_id).map(|(_, v)| v)
    }

    pub fn set_tag(&self, volume_id: &str, key: &str, value: &str) {
        if let Some(mut volume) = self.volumes.get_mut(volume_id) {
            volume.tags.insert(key, value);
        }
    }

    pub fn set_attached(&self, volume_id: &str, attached: bool) {
        if let Some(mut volume) = self.volumes.get_mut(volume_id) {
            volume.attached = attached;
        }
    }

    pub fn volume(&self, volume_id: &str) -> Option<MemoryVolume> {
        self.volumes.get(volume_id).map(|v| v.value().clone())
    }

    pub fn contains(&self, volume_id: &str) -> bool {
        self.volumes.contains_key(volume_id)
    }

    /// Make `list_unattached_candidates` fail until reset.
    pub fn set_listing_unavailable(&self, unavailable: bool) {
        self.listing_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every call for this volume fail with `Unavailable`.
    pub fn set_unavailable(&self, volume_id: &str, unavailable: bool) {
        if unavailable {
            self.unavailable.insert(volume_id.to_string());
        } else {
            self.unavailable.remove(volume_id);
        }
    }

    /// Make `delete_volume` fail with `DeleteRejected` for this volume.
    pub fn set_reject_delete(&self, volume_id: &str, reject: bool) {
        if reject {
            self.reject_delete.insert(volume_id.to_string());
        } else {
            self.reject_delete.remove(volume_id);
        }
    }

    /// Make only `clear_deletion_mark_tags` fail with `Unavailable` for this volume.
    pub fn set_unmark_unavailable(&self, volume_id: &str, unavailable: bool) {
        if unavailable {
            self.unmark_unavailable.insert(volume_id.to_string());
        } else {
            self.unmark_unavailable.remove(volume_id);
        }
    }

    /// Number of `delete_volume` calls that actually removed this volume.
    pub fn delete_count(&self, volume_id: &str) -> u32 {
        self.delete_calls.get(volume_id).map(|c| *c).unwrap_or(0)
    }

    fn check_available(&self, volume_id: &str) -> InventoryResult<()> {
        if self.unavailable.contains(volume_id) {
            return Err(InventoryError::Unavailable(format!(
                "injected fault for {volume_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeInventory for MemoryInventory {
    async fn list_unattached_candidates(&self) -> InventoryResult<Vec<VolumeCandidate>> {
        if self.listing_unavailable.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable(
                "injected listing fault".to_string(),
            ));
        }

        let mut candidates: Vec<VolumeCandidate> = self
            .volumes
            .iter()
            .filter(|v| !v.attached)
            .map(|v| VolumeCandidate {
                volume_id: v.key().clone(),
                tags: v.tags.clone(),
            })
            .collect();
        candidates.sort_by(|a, b| a.volume_id.cmp(&b.volume_id));
        Ok(candidates)
    }

    async fn get_tags(&self, volume_id: &str) -> InventoryResult<TagSet> {
        self.check_available(volume_id)?;
        self.volumes
            .get(volume_id)
            .map(|v| v.tags.clone())
            .ok_or_else(|| InventoryError::VolumeNotFound(volume_id.to_string()))
    }

    async fn apply_deletion_mark_tags(
        &self,
        volume_id: &str,
        mark: &DeletionMark,
    ) -> InventoryResult<()> {
        self.check_available(volume_id)?;
        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| InventoryError::VolumeNotFound(volume_id.to_string()))?;
        for (key, value) in mark.tags().iter() {
            volume.tags.insert(key, value);
        }
        Ok(())
    }

    async fn clear_deletion_mark_tags(&self, volume_id: &str) -> InventoryResult<()> {
        self.check_available(volume_id)?;
        if self.unmark_unavailable.contains(volume_id) {
            return Err(InventoryError::Unavailable(format!(
                "injected unmark fault for {volume_id}"
            )));
        }
        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| InventoryError::VolumeNotFound(volume_id.to_string()))?;
        for key in MARK_TAG_KEYS {
            volume.tags.remove(key);
        }
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> InventoryResult<()> {
        self.check_available(volume_id)?;

        let attached = match self.volumes.get(volume_id) {
            Some(v) => v.attached,
            None => return Err(InventoryError::VolumeNotFound(volume_id.to_string())),
        };

        if attached || self.reject_delete.contains(volume_id) {
            return Err(InventoryError::DeleteRejected {
                volume_id: volume_id.to_string(),
                reason: "volume is in use".to_string(),
            });
        }

        // Removal is the linearization point; a concurrent caller sees NotFound.
        if self.volumes.remove(volume_id).is_none() {
            return Err(InventoryError::VolumeNotFound(volume_id.to_string()));
        }
        *self.delete_calls.entry(volume_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::policy::{DELETE_TAG, DO_NOT_DELETE_TAG, UPDATED_BY_TAG, UPDATED_ON_TAG};

    #[tokio::test]
    async fn test_lists_only_unattached() {
        let inventory = MemoryInventory::new();
        inventory.insert_unattached("vol-b", TagSet::new());
        inventory.insert_unattached("vol-a", TagSet::new());
        inventory.insert_attached("vol-c", TagSet::new());

        let ids: Vec<_> = inventory
            .list_unattached_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.volume_id)
            .collect();
        assert_eq!(ids, vec!["vol-a", "vol-b"]);
    }

    #[tokio::test]
    async fn test_mark_is_idempotent_and_preserves_other_tags() {
        let inventory = MemoryInventory::new();
        inventory.insert_unattached("vol-a", TagSet::new().with("Team", "storage"));

        let mark = DeletionMark::new("Cleanup", Utc::now());
        inventory.apply_deletion_mark_tags("vol-a", &mark).await.unwrap();
        inventory.apply_deletion_mark_tags("vol-a", &mark).await.unwrap();

        let tags = inventory.get_tags("vol-a").await.unwrap();
        assert_eq!(tags.len(), 4);
        assert_eq!(tags.get("Team"), Some("storage"));
        assert_eq!(tags.get(DELETE_TAG), Some("true"));
        assert!(tags.contains_key(UPDATED_ON_TAG));
    }

    #[tokio::test]
    async fn test_clear_mark_keeps_operator_tags() {
        let inventory = MemoryInventory::new();
        inventory.insert_unattached(
            "vol-a",
            TagSet::new()
                .with(DELETE_TAG, "true")
                .with(UPDATED_BY_TAG, "Cleanup")
                .with(DO_NOT_DELETE_TAG, "yes"),
        );

        inventory.clear_deletion_mark_tags("vol-a").await.unwrap();

        let tags = inventory.get_tags("vol-a").await.unwrap();
        assert!(!tags.contains_key(DELETE_TAG));
        assert!(!tags.contains_key(UPDATED_BY_TAG));
        assert!(tags.contains_key(DO_NOT_DELETE_TAG));
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let inventory = MemoryInventory::new();
        inventory.insert_unattached("vol-a", TagSet::new());

        inventory.delete_volume("vol-a").await.unwrap();
        let err = inventory.delete_volume("vol-a").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(inventory.delete_count("vol-a"), 1);
    }

    #[tokio::test]
    async fn test_delete_attached_is_rejected() {
        let inventory = MemoryInventory::new();
        inventory.insert_attached("vol-a", TagSet::new());

        let err = inventory.delete_volume("vol-a").await.unwrap_err();
        assert!(matches!(err, InventoryError::DeleteRejected { .. }));
        assert!(inventory.contains("vol-a"));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let inventory = MemoryInventory::new();
        inventory.insert_unattached("vol-a", TagSet::new());

        inventory.set_unavailable("vol-a", true);
        assert!(matches!(
            inventory.get_tags("vol-a").await,
            Err(InventoryError::Unavailable(_))
        ));

        inventory.set_listing_unavailable(true);
        assert!(inventory.list_unattached_candidates().await.is_err());
    }
}
