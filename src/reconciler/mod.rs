//! Reconciliation of unattached volumes against the tracking store.
//!
//! One pass:
//! 1. Discovers unattached volumes, marks new non-exempt ones with deletion
//!    tags and starts tracking them
//! 2. Re-validates every tracked volume against its live tags
//! 3. Deletes volumes that are approved and past the grace period, and forgets
//!    volumes that vanished or were exempted by an operator
//! 4. Publishes one summary, even when the pass was aborted
//!
//! Per-volume errors never stop the pass; they are collected into the summary
//! and the affected record is left for the next pass.

mod result;
mod worker;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
pub use result::{FailureStage, ForgetReason, PassFailure, PassResult};
use result::{RecordOutcome, RecordReport};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
pub use worker::start_reconciler_worker;

use crate::{
    config::{PolicyConfig, ReaperConfig, ReconcilerConfig},
    inventory::{DeletionMark, InventoryError, VolumeInventory, create_inventory},
    notify::{Notifier, NotifyError, create_notifier},
    observability::metrics,
    policy::{Disposition, TagPolicy},
    tracking::{PutOutcome, TrackingError, TrackingRecord, TrackingStore, create_tracking_store},
};

/// Errors building a reconciler from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to set up volume inventory: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Failed to set up tracking store: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Failed to set up notifier: {0}")]
    Notify(#[from] NotifyError),
}

/// Whole UTC calendar days between two instants.
///
/// Counts date boundaries, not 24-hour periods: 23:59 to 00:01 the next day
/// is one day. Instants in the future count as zero.
pub fn elapsed_days(first_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - first_seen_at.date_naive())
        .num_days()
        .max(0)
}

/// Drives reconciliation passes over injected adapters.
pub struct Reconciler {
    inventory: Arc<dyn VolumeInventory>,
    store: Arc<dyn TrackingStore>,
    notifier: Arc<dyn Notifier>,
    tag_policy: TagPolicy,
    policy: PolicyConfig,
    config: ReconcilerConfig,
}

/// Counts down the deletions still allowed in this pass.
struct DeleteBudget {
    remaining: Option<AtomicU64>,
}

impl DeleteBudget {
    fn new(max_deletes_per_run: u64) -> Self {
        Self {
            remaining: (max_deletes_per_run > 0).then(|| AtomicU64::new(max_deletes_per_run)),
        }
    }

    fn try_take(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

impl Reconciler {
    pub fn new(
        inventory: Arc<dyn VolumeInventory>,
        store: Arc<dyn TrackingStore>,
        notifier: Arc<dyn Notifier>,
        policy: PolicyConfig,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            inventory,
            store,
            notifier,
            tag_policy: TagPolicy::from_config(&policy),
            policy,
            config,
        }
    }

    /// Build the adapters named in the configuration and wire them up.
    pub async fn from_config(config: &ReaperConfig) -> Result<Self, SetupError> {
        let inventory = create_inventory(&config.inventory).await?;
        let store = create_tracking_store(&config.tracking).await?;
        let notifier = create_notifier(&config.notification).await?;

        Ok(Self::new(
            inventory,
            store,
            notifier,
            config.policy.clone(),
            config.reconciler.clone(),
        ))
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one pass now.
    pub async fn run_pass(&self) -> PassResult {
        self.run_pass_at(Utc::now(), &CancellationToken::new())
            .await
    }

    /// Run one pass as if the current time were `now`.
    ///
    /// Cancelling `shutdown`, or exceeding the configured pass timeout, drops
    /// in-flight adapter calls and skips the remaining volumes. The summary of
    /// the work done so far is still published.
    #[instrument(skip(self, shutdown), fields(dry_run = self.config.dry_run))]
    pub async fn run_pass_at(&self, now: DateTime<Utc>, shutdown: &CancellationToken) -> PassResult {
        let start = Instant::now();
        let cancel = shutdown.child_token();
        let timer = self.config.pass_timeout().map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(timeout_secs = timeout.as_secs(), "Reconciliation pass timed out");
                cancel.cancel();
            })
        });

        let mut result = PassResult::begin(now);

        self.discover(now, &cancel, &mut result).await;
        if !cancel.is_cancelled() {
            self.validate(now, &cancel, &mut result).await;
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        result.aborted = cancel.is_cancelled();
        result.finish(Utc::now());

        metrics::record_pass(&result, start.elapsed().as_secs_f64());
        self.publish(&result).await;

        result
    }

    /// Step 1: find unattached volumes, mark and track the new ones.
    async fn discover(&self, now: DateTime<Utc>, cancel: &CancellationToken, result: &mut PassResult) {
        let candidates = match cancel
            .run_until_cancelled(self.inventory.list_unattached_candidates())
            .await
        {
            None => return,
            Some(Ok(candidates)) => candidates,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to list unattached volumes");
                result
                    .failures
                    .push(PassFailure::step(FailureStage::Discovery, e));
                return;
            }
        };

        // Already-tracked volumes keep their original mark and timer.
        let tracked: Option<HashSet<String>> =
            match cancel.run_until_cancelled(self.store.scan_all()).await {
                None => return,
                // Unreadable records still count as tracked: re-marking would not fix them.
                Some(Ok(scan)) => Some(scan.volume_ids().map(str::to_string).collect()),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Failed to read tracking store; not marking new volumes");
                    result.failures.push(PassFailure::step(FailureStage::Track, e));
                    None
                }
            };

        let mark = DeletionMark::new(self.policy.updated_by.clone(), now);

        for candidate in candidates {
            let volume_id = candidate.volume_id;

            if self.tag_policy.classify(&candidate.tags) == Disposition::Exempt {
                tracing::debug!(volume_id = %volume_id, "Skipping exempt volume");
                continue;
            }
            result.candidates.push(volume_id.clone());

            let Some(tracked) = &tracked else {
                continue;
            };
            if tracked.contains(&volume_id) {
                continue;
            }

            match cancel
                .run_until_cancelled(self.inventory.apply_deletion_mark_tags(&volume_id, &mark))
                .await
            {
                None => return,
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_not_found() => {
                    tracing::debug!(volume_id = %volume_id, "Volume vanished before it could be marked");
                    continue;
                }
                Some(Err(e)) => {
                    tracing::warn!(volume_id = %volume_id, error = %e, "Failed to mark volume");
                    result
                        .failures
                        .push(PassFailure::volume(&volume_id, FailureStage::Mark, e));
                    continue;
                }
            }

            match cancel
                .run_until_cancelled(self.store.put(&volume_id, now))
                .await
            {
                None => return,
                Some(Ok(PutOutcome::Created)) => {
                    tracing::info!(volume_id = %volume_id, "Marked volume for deletion");
                }
                Some(Ok(PutOutcome::AlreadyTracked)) => {
                    tracing::debug!(volume_id = %volume_id, "Volume tracked concurrently by another pass");
                }
                Some(Err(e)) => {
                    tracing::warn!(volume_id = %volume_id, error = %e, "Failed to track volume");
                    result
                        .failures
                        .push(PassFailure::volume(&volume_id, FailureStage::Track, e));
                }
            }
        }
    }

    /// Step 2: re-check every tracked volume, concurrently.
    async fn validate(&self, now: DateTime<Utc>, cancel: &CancellationToken, result: &mut PassResult) {
        let scan = match cancel.run_until_cancelled(self.store.scan_all()).await {
            None => return,
            Some(Ok(scan)) => scan,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to scan tracking store");
                result
                    .failures
                    .push(PassFailure::step(FailureStage::Validate, e));
                return;
            }
        };

        for corrupt in scan.corrupt {
            let failure = match corrupt.volume_id {
                Some(volume_id) => {
                    PassFailure::volume(volume_id, FailureStage::Validate, corrupt.reason)
                }
                None => PassFailure::step(FailureStage::Validate, corrupt.reason),
            };
            result.failures.push(failure);
        }

        let records = scan.records;
        tracing::debug!(tracked = records.len(), "Validating tracked volumes");

        let budget = DeleteBudget::new(self.config.max_deletes_per_run);
        let mut reports = futures::stream::iter(records)
            .map(|record| self.validate_record(record, now, &budget))
            .buffer_unordered(self.config.concurrency.max(1));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = reports.next() => match next {
                    Some(report) => result.record(report),
                    None => break,
                },
            }
        }
    }

    /// Decide and act on one tracked volume.
    #[instrument(skip(self, now, budget), fields(volume_id = %record.volume_id))]
    async fn validate_record(
        &self,
        record: TrackingRecord,
        now: DateTime<Utc>,
        budget: &DeleteBudget,
    ) -> RecordReport {
        let TrackingRecord {
            volume_id,
            first_seen_at,
        } = record;

        let tags = match self.inventory.get_tags(&volume_id).await {
            Ok(tags) => tags,
            Err(e) if e.is_not_found() => {
                tracing::info!("Tracked volume no longer exists; forgetting it");
                return self.forget(volume_id, ForgetReason::Orphaned).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read volume tags");
                return RecordReport::kept(volume_id, FailureStage::Validate, e);
            }
        };

        match self.tag_policy.classify(&tags) {
            Disposition::Exempt => {
                tracing::info!("Volume exempted by operator; forgetting it");
                let report = self.forget(volume_id, ForgetReason::Exempt).await;
                if report.outcome != RecordOutcome::Forgotten(ForgetReason::Exempt) {
                    return report;
                }
                self.clear_marks(report).await
            }
            Disposition::Undecided => RecordReport::new(volume_id, RecordOutcome::Waiting),
            Disposition::DeleteApproved => {
                let days = elapsed_days(first_seen_at, now);
                if days < i64::from(self.policy.grace_period_days) {
                    tracing::debug!(elapsed_days = days, "Volume still within grace period");
                    return RecordReport::new(volume_id, RecordOutcome::Waiting);
                }
                self.delete(volume_id, days, budget).await
            }
        }
    }

    /// Delete a mature volume and drop its record.
    async fn delete(&self, volume_id: String, days: i64, budget: &DeleteBudget) -> RecordReport {
        if self.config.dry_run {
            tracing::info!(elapsed_days = days, "DRY RUN: Would delete volume {}", volume_id);
            return RecordReport::new(volume_id, RecordOutcome::WouldDelete);
        }

        if !budget.try_take() {
            tracing::info!(
                max_deletes_per_run = self.config.max_deletes_per_run,
                "Deletion cap reached; deferring volume to the next pass"
            );
            return RecordReport::new(volume_id, RecordOutcome::Deferred);
        }

        match self.inventory.delete_volume(&volume_id).await {
            Ok(()) => {
                tracing::info!(elapsed_days = days, "Deleted volume {}", volume_id);
            }
            Err(e) if e.is_not_found() => {
                tracing::info!("Volume already gone at deletion time");
            }
            Err(e @ InventoryError::DeleteRejected { .. }) => {
                tracing::warn!(error = %e, "Volume deletion rejected; will retry next pass");
                return RecordReport::kept(volume_id, FailureStage::Delete, e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Volume deletion failed; will retry next pass");
                return RecordReport::kept(volume_id, FailureStage::Delete, e);
            }
        }

        let report = RecordReport::new(volume_id, RecordOutcome::Deleted);
        match self.store.remove(&report.volume_id).await {
            Ok(()) => report,
            Err(e) => {
                // The next pass sees VolumeNotFound and prunes the record.
                tracing::warn!(error = %e, "Deleted volume but failed to remove its tracking record");
                let failure = PassFailure::volume(&report.volume_id, FailureStage::Prune, e);
                report.with_failure(failure)
            }
        }
    }

    /// Drop a record without deleting the volume.
    async fn forget(&self, volume_id: String, reason: ForgetReason) -> RecordReport {
        match self.store.remove(&volume_id).await {
            Ok(()) => RecordReport::new(volume_id, RecordOutcome::Forgotten(reason)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to remove tracking record");
                RecordReport::kept(volume_id, FailureStage::Prune, e)
            }
        }
    }

    /// Best-effort removal of the reaper's own tags from an exempted volume.
    async fn clear_marks(&self, report: RecordReport) -> RecordReport {
        match self
            .inventory
            .clear_deletion_mark_tags(&report.volume_id)
            .await
        {
            Ok(()) => report,
            Err(e) if e.is_not_found() => report,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear deletion mark tags");
                let failure = PassFailure::volume(&report.volume_id, FailureStage::Unmark, e);
                report.with_failure(failure)
            }
        }
    }

    async fn publish(&self, result: &PassResult) {
        match self.notifier.publish(result).await {
            Ok(()) => {
                tracing::debug!(notifier = self.notifier.name(), "Published pass summary");
            }
            Err(e) => {
                tracing::error!(
                    notifier = self.notifier.name(),
                    error = %e,
                    "Failed to publish pass summary"
                );
                metrics::record_notification_failure(self.notifier.name());
            }
        }
    }
}

/// Build adapters from configuration and run a single pass.
pub async fn run_reconciliation_pass(config: &ReaperConfig) -> Result<PassResult, SetupError> {
    let reconciler = Reconciler::from_config(config).await?;
    Ok(reconciler.run_pass().await)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        inventory::MemoryInventory,
        notify::MemoryNotifier,
        policy::{DELETE_TAG, DO_NOT_DELETE_TAG, TagSet, UPDATED_BY_TAG},
        tracking::{MemoryTrackingStore, TrackingScan},
    };

    struct Harness {
        inventory: Arc<MemoryInventory>,
        store: Arc<MemoryTrackingStore>,
        notifier: Arc<MemoryNotifier>,
        reconciler: Reconciler,
    }

    fn harness_with(config: ReconcilerConfig) -> Harness {
        let inventory = Arc::new(MemoryInventory::new());
        let store = Arc::new(MemoryTrackingStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let reconciler = Reconciler::new(
            inventory.clone(),
            store.clone(),
            notifier.clone(),
            PolicyConfig::default(),
            config,
        );
        Harness {
            inventory,
            store,
            notifier,
            reconciler,
        }
    }

    fn harness() -> Harness {
        harness_with(ReconcilerConfig::default())
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    async fn pass(h: &Harness, now: DateTime<Utc>) -> PassResult {
        h.reconciler
            .run_pass_at(now, &CancellationToken::new())
            .await
    }

    #[test]
    fn test_elapsed_days_counts_calendar_boundaries() {
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();
        assert_eq!(elapsed_days(first, next), 1);

        let morning = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(elapsed_days(morning, first), 0);

        assert_eq!(elapsed_days(next, first), 0);
    }

    #[test]
    fn test_delete_budget() {
        let unlimited = DeleteBudget::new(0);
        assert!((0..100).all(|_| unlimited.try_take()));

        let capped = DeleteBudget::new(2);
        assert!(capped.try_take());
        assert!(capped.try_take());
        assert!(!capped.try_take());
    }

    #[tokio::test]
    async fn test_discovery_marks_and_tracks() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.inventory.insert_attached("vol-b", TagSet::new());

        let result = pass(&h, day(1, 10)).await;

        assert_eq!(result.candidates, vec!["vol-a"]);
        assert!(result.deleted.is_empty());
        assert_eq!(h.store.get("vol-a"), Some(day(1, 10)));
        assert!(h.store.get("vol-b").is_none());

        let tags = h.inventory.volume("vol-a").unwrap().tags;
        assert_eq!(tags.get(DELETE_TAG), Some("true"));
        assert_eq!(tags.get(UPDATED_BY_TAG), Some("Cleanup"));
    }

    #[tokio::test]
    async fn test_exempt_candidates_skipped() {
        let h = harness();
        h.inventory
            .insert_unattached("vol-a", TagSet::new().with(DO_NOT_DELETE_TAG, "yes"));

        let result = pass(&h, day(1, 10)).await;

        assert!(result.candidates.is_empty());
        assert!(h.store.is_empty());
        assert!(!h.inventory.volume("vol-a").unwrap().tags.contains_key(DELETE_TAG));
    }

    #[tokio::test]
    async fn test_rediscovery_does_not_reset_timer() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());

        pass(&h, day(1, 10)).await;
        let before = h.inventory.volume("vol-a").unwrap().tags;
        h.reconciler.run_pass_at(day(1, 20), &CancellationToken::new()).await;

        assert_eq!(h.store.get("vol-a"), Some(day(1, 10)));
        assert_eq!(h.inventory.volume("vol-a").unwrap().tags, before);
    }

    #[tokio::test]
    async fn test_undecided_tracked_volume_waits() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.store.put("vol-a", day(1, 10)).await.unwrap();

        // Tracked but never marked (e.g. marked by an older job and the tag was removed).
        let result = pass(&h, day(9, 10)).await;

        assert!(result.deleted.is_empty());
        assert_eq!(result.waiting, 1);
        assert!(h.inventory.contains("vol-a"));
    }

    #[tokio::test]
    async fn test_listing_failure_still_validates_and_notifies() {
        let h = harness();
        h.inventory
            .insert_unattached("vol-a", TagSet::new().with(DELETE_TAG, "true"));
        h.store.put("vol-a", day(1, 10)).await.unwrap();
        h.inventory.set_listing_unavailable(true);

        let result = pass(&h, day(3, 10)).await;

        assert_eq!(result.deleted, vec!["vol-a"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Discovery);
        assert_eq!(result.failures[0].volume_id, None);
        assert_eq!(h.notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_volume_does_not_block_others() {
        let h = harness();
        for id in ["vol-a", "vol-b", "vol-c"] {
            h.inventory
                .insert_unattached(id, TagSet::new().with(DELETE_TAG, "true"));
            h.store.put(id, day(1, 10)).await.unwrap();
        }
        h.inventory.set_unavailable("vol-b", true);

        let result = pass(&h, day(2, 10)).await;

        assert_eq!(result.deleted, vec!["vol-a", "vol-c"]);
        assert_eq!(
            result.failures,
            vec![PassFailure::volume(
                "vol-b",
                FailureStage::Validate,
                InventoryError::Unavailable("injected fault for vol-b".into())
            )]
        );
        assert_eq!(h.store.get("vol-b"), Some(day(1, 10)));
    }

    #[tokio::test]
    async fn test_exempt_tracked_volume_has_marks_cleared() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        pass(&h, day(1, 10)).await;

        h.inventory.set_tag("vol-a", DO_NOT_DELETE_TAG, "needed");
        let result = pass(&h, day(5, 10)).await;

        assert_eq!(result.forgotten, vec!["vol-a"]);
        let tags = h.inventory.volume("vol-a").unwrap().tags;
        assert!(!tags.contains_key(DELETE_TAG));
        assert!(!tags.contains_key(UPDATED_BY_TAG));
        assert!(tags.contains_key(DO_NOT_DELETE_TAG));
    }

    #[tokio::test]
    async fn test_dry_run_never_deletes() {
        let h = harness_with(ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        });
        h.inventory.insert_unattached("vol-a", TagSet::new());
        pass(&h, day(1, 10)).await;

        let result = pass(&h, day(3, 10)).await;

        assert!(result.deleted.is_empty());
        assert_eq!(result.would_delete, vec!["vol-a"]);
        assert!(h.inventory.contains("vol-a"));
        assert!(h.store.get("vol-a").is_some());
    }

    #[tokio::test]
    async fn test_max_deletes_per_run_defers_the_rest() {
        let h = harness_with(ReconcilerConfig {
            max_deletes_per_run: 2,
            ..Default::default()
        });
        for id in ["vol-a", "vol-b", "vol-c"] {
            h.inventory
                .insert_unattached(id, TagSet::new().with(DELETE_TAG, "true"));
            h.store.put(id, day(1, 10)).await.unwrap();
        }

        let first = pass(&h, day(2, 10)).await;
        assert_eq!(first.deleted.len(), 2);
        assert_eq!(first.waiting, 1);
        assert_eq!(h.store.len(), 1);

        let second = pass(&h, day(2, 11)).await;
        assert_eq!(second.deleted.len(), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_pass() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.notifier.set_failing(true);

        let result = pass(&h, day(1, 10)).await;

        assert_eq!(result.candidates, vec!["vol-a"]);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pass_still_notifies() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = h.reconciler.run_pass_at(day(1, 10), &shutdown).await;

        assert!(result.aborted);
        assert!(h.store.is_empty());
        let published = h.notifier.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_timeout_aborts() {
        let h = harness_with(ReconcilerConfig {
            pass_timeout_secs: 1,
            ..Default::default()
        });

        /// Store whose scan never completes.
        struct StuckStore;

        #[async_trait::async_trait]
        impl TrackingStore for StuckStore {
            async fn put(
                &self,
                _volume_id: &str,
                _first_seen_at: DateTime<Utc>,
            ) -> crate::tracking::TrackingResult<PutOutcome> {
                Ok(PutOutcome::Created)
            }

            async fn scan_all(&self) -> crate::tracking::TrackingResult<TrackingScan> {
                futures::future::pending().await
            }

            async fn remove(&self, _volume_id: &str) -> crate::tracking::TrackingResult<()> {
                Ok(())
            }
        }

        let reconciler = Reconciler::new(
            h.inventory.clone(),
            Arc::new(StuckStore),
            h.notifier.clone(),
            PolicyConfig::default(),
            h.reconciler.config().clone(),
        );
        h.inventory.insert_unattached("vol-a", TagSet::new());

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            reconciler.run_pass_at(day(1, 10), &CancellationToken::new()),
        )
        .await
        .expect("pass should abort on its own timeout");

        assert!(result.aborted);
        assert_eq!(h.notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_failure_leaves_volume_untracked() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.inventory.insert_unattached("vol-b", TagSet::new());
        h.inventory.set_unavailable("vol-a", true);

        let result = pass(&h, day(1, 10)).await;

        assert_eq!(result.candidates, vec!["vol-a", "vol-b"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].volume_id.as_deref(), Some("vol-a"));
        assert_eq!(result.failures[0].stage, FailureStage::Mark);
        assert!(h.store.get("vol-a").is_none());
        assert_eq!(h.store.get("vol-b"), Some(day(1, 10)));

        h.inventory.set_unavailable("vol-a", false);
        let retried = pass(&h, day(2, 10)).await;
        assert!(retried.failures.is_empty());
        assert_eq!(h.store.get("vol-a"), Some(day(2, 10)));
    }

    #[tokio::test]
    async fn test_track_failure_is_retried_next_pass() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.inventory.insert_unattached("vol-b", TagSet::new());
        h.store.set_unavailable("vol-a", true);

        let result = pass(&h, day(1, 10)).await;

        assert_eq!(
            result.failures,
            vec![PassFailure::volume(
                "vol-a",
                FailureStage::Track,
                TrackingError::Unavailable("injected fault for vol-a".into())
            )]
        );
        // Marked, but the timer has not started.
        assert_eq!(
            h.inventory.volume("vol-a").unwrap().tags.get(DELETE_TAG),
            Some("true")
        );
        assert!(h.store.get("vol-a").is_none());
        assert_eq!(h.store.get("vol-b"), Some(day(1, 10)));

        h.store.set_unavailable("vol-a", false);
        let retried = pass(&h, day(2, 10)).await;
        assert!(retried.failures.is_empty());
        // Only the volume tracked on day 1 is mature.
        assert_eq!(retried.deleted, vec!["vol-b"]);
        assert_eq!(h.store.get("vol-a"), Some(day(2, 10)));
    }

    #[tokio::test]
    async fn test_prune_failure_after_delete_is_cleaned_up_later() {
        let h = harness();
        h.inventory
            .insert_unattached("vol-a", TagSet::new().with(DELETE_TAG, "true"));
        h.store.put("vol-a", day(1, 10)).await.unwrap();
        h.store.set_unavailable("vol-a", true);

        let result = pass(&h, day(3, 10)).await;

        assert_eq!(result.deleted, vec!["vol-a"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Prune);
        assert!(!h.inventory.contains("vol-a"));
        assert_eq!(h.store.get("vol-a"), Some(day(1, 10)));

        h.store.set_unavailable("vol-a", false);
        let next = pass(&h, day(4, 10)).await;
        assert_eq!(next.forgotten, vec!["vol-a"]);
        assert!(next.deleted.is_empty());
        assert!(h.store.is_empty());
        assert_eq!(h.inventory.delete_count("vol-a"), 1);
    }

    #[tokio::test]
    async fn test_prune_failure_on_orphan_keeps_record() {
        let h = harness();
        h.store.put("vol-gone", day(1, 10)).await.unwrap();
        h.store.set_unavailable("vol-gone", true);

        let result = pass(&h, day(2, 10)).await;

        assert!(result.forgotten.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].volume_id.as_deref(), Some("vol-gone"));
        assert_eq!(result.failures[0].stage, FailureStage::Prune);
        assert_eq!(h.store.get("vol-gone"), Some(day(1, 10)));
    }

    #[tokio::test]
    async fn test_prune_failure_on_exempt_keeps_marks() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        pass(&h, day(1, 10)).await;
        h.inventory.set_tag("vol-a", DO_NOT_DELETE_TAG, "true");
        h.store.set_unavailable("vol-a", true);

        let result = pass(&h, day(2, 10)).await;

        assert!(result.forgotten.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, FailureStage::Prune);
        assert!(h.store.get("vol-a").is_some());
        // Marks stay until the record is gone, so the next pass retries both.
        assert_eq!(
            h.inventory.volume("vol-a").unwrap().tags.get(DELETE_TAG),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_unmark_failure_still_forgets() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        pass(&h, day(1, 10)).await;
        h.inventory.set_tag("vol-a", DO_NOT_DELETE_TAG, "true");
        h.inventory.set_unmark_unavailable("vol-a", true);

        let result = pass(&h, day(2, 10)).await;

        assert_eq!(result.forgotten, vec!["vol-a"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].volume_id.as_deref(), Some("vol-a"));
        assert_eq!(result.failures[0].stage, FailureStage::Unmark);
        assert!(h.store.is_empty());
        assert!(h.inventory.contains("vol-a"));
    }

    #[tokio::test]
    async fn test_scan_failure_skips_marking_and_validation() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        h.store.set_scan_unavailable(true);

        let result = pass(&h, day(1, 10)).await;

        assert_eq!(result.candidates, vec!["vol-a"]);
        let stages: Vec<_> = result.failures.iter().map(|f| f.stage).collect();
        assert_eq!(stages, vec![FailureStage::Track, FailureStage::Validate]);
        assert!(result.failures.iter().all(|f| f.volume_id.is_none()));
        assert!(h.store.is_empty());
        assert!(!h.inventory.volume("vol-a").unwrap().tags.contains_key(DELETE_TAG));
        assert_eq!(h.notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn test_reattached_volume_is_not_deleted() {
        let h = harness();
        h.inventory.insert_unattached("vol-a", TagSet::new());
        pass(&h, day(1, 10)).await;
        h.inventory.set_attached("vol-a", true);

        let result = pass(&h, day(3, 10)).await;

        assert!(result.candidates.is_empty());
        assert!(result.deleted.is_empty());
        assert_eq!(result.failures[0].stage, FailureStage::Delete);
        assert!(h.inventory.contains("vol-a"));
        assert_eq!(h.store.get("vol-a"), Some(day(1, 10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_validation_reports_finished_records() {
        /// Inventory whose `get_tags` never returns for one volume.
        struct StallingInventory {
            inner: Arc<MemoryInventory>,
            stalled: &'static str,
        }

        #[async_trait::async_trait]
        impl VolumeInventory for StallingInventory {
            async fn list_unattached_candidates(
                &self,
            ) -> crate::inventory::InventoryResult<Vec<crate::inventory::VolumeCandidate>> {
                self.inner.list_unattached_candidates().await
            }

            async fn get_tags(&self, volume_id: &str) -> crate::inventory::InventoryResult<TagSet> {
                if volume_id == self.stalled {
                    futures::future::pending::<()>().await;
                }
                self.inner.get_tags(volume_id).await
            }

            async fn apply_deletion_mark_tags(
                &self,
                volume_id: &str,
                mark: &DeletionMark,
            ) -> crate::inventory::InventoryResult<()> {
                self.inner.apply_deletion_mark_tags(volume_id, mark).await
            }

            async fn clear_deletion_mark_tags(
                &self,
                volume_id: &str,
            ) -> crate::inventory::InventoryResult<()> {
                self.inner.clear_deletion_mark_tags(volume_id).await
            }

            async fn delete_volume(&self, volume_id: &str) -> crate::inventory::InventoryResult<()> {
                self.inner.delete_volume(volume_id).await
            }
        }

        let h = harness();
        for id in ["vol-a", "vol-b", "vol-stuck"] {
            h.inventory
                .insert_unattached(id, TagSet::new().with(DELETE_TAG, "true"));
            h.store.put(id, day(1, 10)).await.unwrap();
        }
        let reconciler = Reconciler::new(
            Arc::new(StallingInventory {
                inner: h.inventory.clone(),
                stalled: "vol-stuck",
            }),
            h.store.clone(),
            h.notifier.clone(),
            PolicyConfig::default(),
            ReconcilerConfig {
                pass_timeout_secs: 5,
                ..Default::default()
            },
        );

        let result = reconciler
            .run_pass_at(day(3, 10), &CancellationToken::new())
            .await;

        assert!(result.aborted);
        assert_eq!(result.deleted, vec!["vol-a", "vol-b"]);
        assert_eq!(h.store.get("vol-stuck"), Some(day(1, 10)));
        assert!(h.inventory.contains("vol-stuck"));

        let published = h.notifier.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].aborted);
        assert_eq!(published[0].deleted, vec!["vol-a", "vol-b"]);
    }
}
