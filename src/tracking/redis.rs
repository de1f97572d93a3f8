use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use super::{
    PutOutcome, TrackingRecord, TrackingResult, TrackingScan, TrackingStore, format_timestamp,
    parse_timestamp,
};

/// Redis hash-backed tracking store.
///
/// All records live in a single hash: field = volume id, value = first-seen
/// timestamp. `HSETNX` gives the conditional create.
pub struct RedisTrackingStore {
    client: redis::Client,
    key: String,
}

impl RedisTrackingStore {
    pub async fn new(url: &str, key: String) -> TrackingResult<Self> {
        let client = redis::Client::open(url)?;

        // Test connectivity
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!(key = %key, "Using Redis tracking store");

        Ok(Self { client, key })
    }

    async fn conn(&self) -> TrackingResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

/// Decode the raw hash: field = volume id, value = timestamp.
fn decode_hash(raw: HashMap<String, String>) -> TrackingScan {
    let mut scan = TrackingScan::default();
    for (volume_id, ts) in raw {
        let decoded = parse_timestamp(&ts).map(|t| TrackingRecord::new(volume_id.clone(), t));
        scan.push_decoded(Some(&volume_id), decoded);
    }
    scan
}

#[async_trait]
impl TrackingStore for RedisTrackingStore {
    async fn put(
        &self,
        volume_id: &str,
        first_seen_at: DateTime<Utc>,
    ) -> TrackingResult<PutOutcome> {
        let mut conn = self.conn().await?;
        let created: bool = conn
            .hset_nx(&self.key, volume_id, format_timestamp(first_seen_at))
            .await?;

        Ok(if created {
            PutOutcome::Created
        } else {
            PutOutcome::AlreadyTracked
        })
    }

    async fn scan_all(&self) -> TrackingResult<TrackingScan> {
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(&self.key).await?;
        Ok(decode_hash(raw))
    }

    async fn remove(&self, volume_id: &str) -> TrackingResult<()> {
        let mut conn = self.conn().await?;
        let _: u64 = conn.hdel(&self.key, volume_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_decode_hash_skips_bad_timestamps() {
        let raw = HashMap::from([
            ("vol-a".to_string(), "2024-03-01T10:00:00.000Z".to_string()),
            ("vol-b".to_string(), "03/01/24 10:00:00".to_string()),
            ("vol-c".to_string(), "last tuesday".to_string()),
        ]);

        let mut scan = decode_hash(raw);
        scan.records.sort_by(|a, b| a.volume_id.cmp(&b.volume_id));

        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            scan.records,
            vec![TrackingRecord::new("vol-a", t), TrackingRecord::new("vol-b", t)]
        );
        assert_eq!(scan.corrupt.len(), 1);
        assert_eq!(scan.corrupt[0].volume_id.as_deref(), Some("vol-c"));
    }
}
