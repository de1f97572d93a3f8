use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet, mapref::entry::Entry};

use super::{
    PutOutcome, TrackingError, TrackingRecord, TrackingResult, TrackingScan, TrackingStore,
};

/// In-memory tracking store (for testing only).
///
/// Faults can be injected per volume, or for the whole scan, to exercise the
/// reconciler's error paths.
#[derive(Default)]
pub struct MemoryTrackingStore {
    records: DashMap<String, DateTime<Utc>>,
    scan_unavailable: AtomicBool,
    unavailable: DashSet<String>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, volume_id: &str) -> Option<DateTime<Utc>> {
        self.records.get(volume_id).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Make `scan_all` fail until reset.
    pub fn set_scan_unavailable(&self, unavailable: bool) {
        self.scan_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `put` and `remove` fail with `Unavailable` for this volume.
    pub fn set_unavailable(&self, volume_id: &str, unavailable: bool) {
        if unavailable {
            self.unavailable.insert(volume_id.to_string());
        } else {
            self.unavailable.remove(volume_id);
        }
    }

    fn check_available(&self, volume_id: &str) -> TrackingResult<()> {
        if self.unavailable.contains(volume_id) {
            return Err(TrackingError::Unavailable(format!(
                "injected fault for {volume_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn put(
        &self,
        volume_id: &str,
        first_seen_at: DateTime<Utc>,
    ) -> TrackingResult<PutOutcome> {
        self.check_available(volume_id)?;
        // The entry holds the shard lock, so check-and-insert is atomic.
        match self.records.entry(volume_id.to_string()) {
            Entry::Occupied(_) => Ok(PutOutcome::AlreadyTracked),
            Entry::Vacant(slot) => {
                slot.insert(first_seen_at);
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn scan_all(&self) -> TrackingResult<TrackingScan> {
        if self.scan_unavailable.load(Ordering::SeqCst) {
            return Err(TrackingError::Unavailable(
                "injected scan fault".to_string(),
            ));
        }
        Ok(self
            .records
            .iter()
            .map(|r| TrackingRecord::new(r.key().clone(), *r.value()))
            .collect())
    }

    async fn remove(&self, volume_id: &str) -> TrackingResult<()> {
        self.check_available(volume_id)?;
        self.records.remove(volume_id);
        Ok(())
    }
}
