use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    PutOutcome, TrackingError, TrackingRecord, TrackingResult, TrackingScan, TrackingStore,
    format_timestamp, parse_timestamp,
};

/// File-based tracking store.
///
/// Stores one JSON file per volume in a directory. The directory is the source
/// of truth, so several processes may share it.
pub struct FileTrackingStore {
    /// Base directory for record files.
    path: PathBuf,
}

/// On-disk layout of a record file.
#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    volume_id: String,
    first_seen_at: String,
}

impl FileTrackingStore {
    /// Create a new file-based tracking store, creating the directory if needed.
    pub async fn new(path: impl AsRef<Path>) -> TrackingResult<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&path).await?;

        tracing::info!(path = ?path, "Using file tracking store");

        Ok(Self { path })
    }

    /// Get the file path for a record.
    fn record_path(&self, volume_id: &str) -> TrackingResult<PathBuf> {
        let valid = !volume_id.is_empty()
            && !volume_id.starts_with('.')
            && volume_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(TrackingError::Serialization(format!(
                "volume id '{volume_id}' cannot be used as a file name"
            )));
        }
        Ok(self.path.join(format!("{volume_id}.json")))
    }

    /// Load a single record from a file.
    async fn load_record_file(path: &Path) -> TrackingResult<TrackingRecord> {
        let contents = tokio::fs::read_to_string(path).await?;
        let file: RecordFile = serde_json::from_str(&contents)
            .map_err(|e| TrackingError::Serialization(e.to_string()))?;
        Ok(TrackingRecord::new(
            file.volume_id,
            parse_timestamp(&file.first_seen_at)?,
        ))
    }
}

#[async_trait]
impl TrackingStore for FileTrackingStore {
    async fn put(
        &self,
        volume_id: &str,
        first_seen_at: DateTime<Utc>,
    ) -> TrackingResult<PutOutcome> {
        let final_path = self.record_path(volume_id)?;
        let json = serde_json::to_string_pretty(&RecordFile {
            volume_id: volume_id.to_string(),
            first_seen_at: format_timestamp(first_seen_at),
        })
        .map_err(|e| TrackingError::Serialization(e.to_string()))?;

        // Write the full record aside, then hard-link it into place. The link
        // fails if the target exists, which makes the create conditional and
        // means readers never observe a half-written record.
        let tmp_path = self.path.join(format!(".{volume_id}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, json).await?;
        let linked = tokio::fs::hard_link(&tmp_path, &final_path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            tracing::warn!(path = ?tmp_path, error = %e, "Failed to remove temporary record file");
        }

        match linked {
            Ok(()) => Ok(PutOutcome::Created),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(PutOutcome::AlreadyTracked)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_all(&self) -> TrackingResult<TrackingScan> {
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut scan = TrackingScan::default();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            let volume_id = path.file_stem().map(|stem| stem.to_string_lossy().into_owned());
            match Self::load_record_file(&path).await {
                // Removed between read_dir and read: a concurrent remove, not corruption.
                Err(TrackingError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                decoded => scan.push_decoded(volume_id.as_deref(), decoded),
            }
        }

        Ok(scan)
    }

    async fn remove(&self, volume_id: &str) -> TrackingResult<()> {
        let path = self.record_path(volume_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
