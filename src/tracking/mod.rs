//! Durable tracking of volumes marked for deletion.
//!
//! Each record maps a volume id to the moment the volume was first found
//! eligible. Records are never updated: the first writer wins, so
//! rediscovering a volume does not restart its grace period.
//!
//! Supports multiple backends:
//! - In-memory (for testing)
//! - JSON files on local disk
//! - Redis - requires `redis` feature
//! - AWS DynamoDB - requires `aws` feature

#[cfg(feature = "aws")]
mod dynamodb;
mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(feature = "aws")]
pub use dynamodb::DynamoDbTrackingStore;
pub use file::FileTrackingStore;
pub use memory::MemoryTrackingStore;
#[cfg(feature = "redis")]
pub use redis::RedisTrackingStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TrackingConfig;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Tracking store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

pub type TrackingResult<T> = Result<T, TrackingError>;

/// When a volume was first found eligible for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub volume_id: String,
    pub first_seen_at: DateTime<Utc>,
}

impl TrackingRecord {
    pub fn new(volume_id: impl Into<String>, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            volume_id: volume_id.into(),
            first_seen_at,
        }
    }
}

/// A stored entry that could not be decoded into a [`TrackingRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    /// `None` when even the volume id is unreadable.
    pub volume_id: Option<String>,
    pub reason: String,
}

/// Snapshot returned by [`TrackingStore::scan_all`].
///
/// Undecodable entries are reported next to the good records instead of
/// failing the scan, so one bad entry cannot stall every other volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingScan {
    pub records: Vec<TrackingRecord>,
    pub corrupt: Vec<CorruptRecord>,
}

impl TrackingScan {
    /// Add one decoded entry, routing decode failures to `corrupt`.
    pub(crate) fn push_decoded(
        &mut self,
        volume_id: Option<&str>,
        decoded: TrackingResult<TrackingRecord>,
    ) {
        match decoded {
            Ok(record) => self.records.push(record),
            Err(e) => {
                tracing::warn!(volume_id = ?volume_id, error = %e, "Skipping unreadable tracking record");
                self.corrupt.push(CorruptRecord {
                    volume_id: volume_id.map(str::to_string),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Every volume id present in the store, readable or not.
    pub fn volume_ids(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .map(|r| r.volume_id.as_str())
            .chain(self.corrupt.iter().filter_map(|c| c.volume_id.as_deref()))
    }
}

impl FromIterator<TrackingRecord> for TrackingScan {
    fn from_iter<I: IntoIterator<Item = TrackingRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
            corrupt: Vec::new(),
        }
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No record existed; one was written.
    Created,
    /// A record already existed and was left untouched.
    AlreadyTracked,
}

/// Key-value store of tracking records.
///
/// Implementations must be thread-safe and support concurrent access. `put`
/// must be a conditional create even when two callers race for the same id.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create a record unless one already exists for this volume.
    async fn put(&self, volume_id: &str, first_seen_at: DateTime<Utc>)
    -> TrackingResult<PutOutcome>;

    /// Snapshot of every record, in no particular order.
    ///
    /// Fails only when the store itself cannot be read. Entries that cannot
    /// be decoded land in [`TrackingScan::corrupt`].
    async fn scan_all(&self) -> TrackingResult<TrackingScan>;

    /// Delete the record if present. Absent is not an error.
    async fn remove(&self, volume_id: &str) -> TrackingResult<()>;
}

/// Parse a persisted timestamp.
///
/// RFC 3339 is what every backend writes; the `%m/%d/%y %H:%M:%S` form is
/// accepted so tables written by the earlier cleanup job keep working.
pub(crate) fn parse_timestamp(raw: &str) -> TrackingResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    chrono::NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| TrackingError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

const LEGACY_TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Create a tracking store from configuration.
pub async fn create_tracking_store(
    config: &TrackingConfig,
) -> TrackingResult<Arc<dyn TrackingStore>> {
    let store: Arc<dyn TrackingStore> = match config {
        TrackingConfig::Memory => {
            tracing::warn!("Using in-memory tracking store; grace periods reset on restart");
            Arc::new(MemoryTrackingStore::new())
        }

        TrackingConfig::File { path } => Arc::new(FileTrackingStore::new(path).await?),

        #[cfg(feature = "redis")]
        TrackingConfig::Redis { url, key } => Arc::new(RedisTrackingStore::new(url, key.clone()).await?),
        #[cfg(not(feature = "redis"))]
        TrackingConfig::Redis { .. } => {
            return Err(TrackingError::Unavailable(
                "Redis tracking store configured but the 'redis' feature is not enabled. \
                Rebuild with: cargo build --features redis"
                    .to_string(),
            ));
        }

        #[cfg(feature = "aws")]
        TrackingConfig::DynamoDb(dynamo) => Arc::new(DynamoDbTrackingStore::new(dynamo).await),
        #[cfg(not(feature = "aws"))]
        TrackingConfig::DynamoDb(_) => {
            return Err(TrackingError::Unavailable(
                "DynamoDB tracking store configured but the 'aws' feature is not enabled. \
                Rebuild with: cargo build --features aws"
                    .to_string(),
            ));
        }
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-05-01T10:00:00.000Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_legacy_format() {
        let ts = parse_timestamp("05/01/24 10:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(TrackingError::Serialization(_))
        ));
    }

    #[test]
    fn test_scan_routes_decode_failures() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut scan = TrackingScan::default();

        scan.push_decoded(Some("vol-a"), Ok(TrackingRecord::new("vol-a", t)));
        scan.push_decoded(
            Some("vol-b"),
            parse_timestamp("2024/03/01").map(|ts| TrackingRecord::new("vol-b", ts)),
        );
        scan.push_decoded(None, Err(TrackingError::Serialization("no key".into())));

        assert_eq!(scan.records, vec![TrackingRecord::new("vol-a", t)]);
        assert_eq!(scan.corrupt.len(), 2);
        assert_eq!(scan.corrupt[0].volume_id.as_deref(), Some("vol-b"));
        assert!(scan.corrupt[0].reason.contains("2024/03/01"));
        assert_eq!(scan.volume_ids().collect::<Vec<_>>(), vec!["vol-a", "vol-b"]);
    }

    #[test]
    fn test_format_round_trips() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
    }
}
