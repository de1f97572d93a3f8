//! AWS DynamoDB tracking store.
//!
//! Table layout: partition key `volumeId` (S), attribute `updated` (S) holding
//! the first-seen timestamp.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, types::AttributeValue};
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{
    PutOutcome, TrackingError, TrackingRecord, TrackingResult, TrackingScan, TrackingStore,
    format_timestamp, parse_timestamp,
};
use crate::config::DynamoDbTrackingConfig;

const KEY_ATTRIBUTE: &str = "volumeId";
const TIMESTAMP_ATTRIBUTE: &str = "updated";

/// DynamoDB-backed tracking store.
pub struct DynamoDbTrackingStore {
    client: Client,
    table_name: String,
}

impl DynamoDbTrackingStore {
    pub async fn new(config: &DynamoDbTrackingConfig) -> Self {
        let sdk_config = crate::aws::load_sdk_config(&config.client).await;

        let mut ddb_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = &config.client.endpoint_url {
            ddb_config = ddb_config.endpoint_url(endpoint_url);
        }

        Self {
            client: Client::from_conf(ddb_config.build()),
            table_name: config.table_name.clone(),
        }
    }

    fn key(volume_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(
            KEY_ATTRIBUTE.to_string(),
            AttributeValue::S(volume_id.to_string()),
        )])
    }

    fn record_from_item(item: &HashMap<String, AttributeValue>) -> TrackingResult<TrackingRecord> {
        let string_attr = |name: &str| {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .ok_or_else(|| {
                    TrackingError::Serialization(format!("item is missing string attribute '{name}'"))
                })
        };

        let volume_id = string_attr(KEY_ATTRIBUTE)?;
        let first_seen_at = parse_timestamp(string_attr(TIMESTAMP_ATTRIBUTE)?)?;
        Ok(TrackingRecord::new(volume_id.clone(), first_seen_at))
    }

    fn push_item(scan: &mut TrackingScan, item: &HashMap<String, AttributeValue>) {
        let volume_id = item.get(KEY_ATTRIBUTE).and_then(|v| v.as_s().ok());
        scan.push_decoded(volume_id.map(String::as_str), Self::record_from_item(item));
    }
}

#[async_trait]
impl TrackingStore for DynamoDbTrackingStore {
    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn put(
        &self,
        volume_id: &str,
        first_seen_at: DateTime<Utc>,
    ) -> TrackingResult<PutOutcome> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(KEY_ATTRIBUTE, AttributeValue::S(volume_id.to_string()))
            .item(
                TIMESTAMP_ATTRIBUTE,
                AttributeValue::S(format_timestamp(first_seen_at)),
            )
            .condition_expression("attribute_not_exists(#k)")
            .expression_attribute_names("#k", KEY_ATTRIBUTE)
            .send()
            .await;

        match result {
            Ok(_) => Ok(PutOutcome::Created),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(PutOutcome::AlreadyTracked)
                } else {
                    Err(TrackingError::Unavailable(format!(
                        "PutItem failed for '{}': {}",
                        volume_id, service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn scan_all(&self) -> TrackingResult<TrackingScan> {
        let mut pages = self
            .client
            .scan()
            .table_name(&self.table_name)
            .consistent_read(true)
            .into_paginator()
            .send();

        let mut scan = TrackingScan::default();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                TrackingError::Unavailable(format!("Scan failed: {}", e.into_service_error()))
            })?;
            for item in page.items() {
                Self::push_item(&mut scan, item);
            }
        }

        Ok(scan)
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn remove(&self, volume_id: &str) -> TrackingResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(volume_id)))
            .send()
            .await
            .map_err(|e| {
                TrackingError::Unavailable(format!(
                    "DeleteItem failed for '{}': {}",
                    volume_id,
                    e.into_service_error()
                ))
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_record_from_legacy_item() {
        let item = HashMap::from([
            (KEY_ATTRIBUTE.to_string(), AttributeValue::S("vol-1".into())),
            (
                TIMESTAMP_ATTRIBUTE.to_string(),
                AttributeValue::S("01/31/24 18:00:00".into()),
            ),
        ]);

        let record = DynamoDbTrackingStore::record_from_item(&item).unwrap();
        assert_eq!(record.volume_id, "vol-1");
        assert_eq!(
            record.first_seen_at,
            Utc.with_ymd_and_hms(2024, 1, 31, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_record_missing_timestamp() {
        let item = HashMap::from([(KEY_ATTRIBUTE.to_string(), AttributeValue::S("vol-1".into()))]);
        assert!(DynamoDbTrackingStore::record_from_item(&item).is_err());
    }

    #[test]
    fn test_bad_items_are_reported_not_fatal() {
        let good = HashMap::from([
            (KEY_ATTRIBUTE.to_string(), AttributeValue::S("vol-1".into())),
            (
                TIMESTAMP_ATTRIBUTE.to_string(),
                AttributeValue::S("2024-03-01T10:00:00Z".into()),
            ),
        ]);
        let bad_timestamp = HashMap::from([
            (KEY_ATTRIBUTE.to_string(), AttributeValue::S("vol-2".into())),
            (
                TIMESTAMP_ATTRIBUTE.to_string(),
                AttributeValue::S("2024/03/01".into()),
            ),
        ]);
        let no_key = HashMap::from([(
            TIMESTAMP_ATTRIBUTE.to_string(),
            AttributeValue::S("2024-03-01T10:00:00Z".into()),
        )]);

        let mut scan = TrackingScan::default();
        for item in [&good, &bad_timestamp, &no_key] {
            DynamoDbTrackingStore::push_item(&mut scan, item);
        }

        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].volume_id, "vol-1");
        let corrupt_ids: Vec<_> = scan.corrupt.iter().map(|c| c.volume_id.as_deref()).collect();
        assert_eq!(corrupt_ids, vec![Some("vol-2"), None]);
    }
}
