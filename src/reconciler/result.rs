use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where in the pass a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Listing unattached volumes.
    Discovery,
    /// Writing the deletion mark tags.
    Mark,
    /// Creating the tracking record.
    Track,
    /// Scanning the store or reading a volume's live tags.
    Validate,
    /// Deleting a mature volume.
    Delete,
    /// Removing a tracking record.
    Prune,
    /// Clearing mark tags from an exempted volume.
    Unmark,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Discovery => "discovery",
            FailureStage::Mark => "mark",
            FailureStage::Track => "track",
            FailureStage::Validate => "validate",
            FailureStage::Delete => "delete",
            FailureStage::Prune => "prune",
            FailureStage::Unmark => "unmark",
        }
    }
}

/// A caught error, surfaced in the pass summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassFailure {
    /// `None` when the failure concerns a whole step rather than one volume.
    pub volume_id: Option<String>,
    pub stage: FailureStage,
    pub reason: String,
}

impl PassFailure {
    pub fn volume(volume_id: impl Into<String>, stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            volume_id: Some(volume_id.into()),
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn step(stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            volume_id: None,
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Why a tracking record was dropped without deleting the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgetReason {
    /// The volume vanished from the inventory.
    Orphaned,
    /// An operator tagged the volume `DoNotDelete`.
    Exempt,
}

/// Outcome of validating one tracked volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordOutcome {
    /// Still within the grace period or not approved; left tracked.
    Waiting,
    /// Deleted (or found already gone) and untracked.
    Deleted,
    /// Mature, but dry run is on.
    WouldDelete,
    /// Mature, but the per-pass deletion cap was reached.
    Deferred,
    /// Tracking dropped without deletion.
    Forgotten(ForgetReason),
    /// An error left the record untouched.
    Kept,
}

/// What happened to one tracked volume, plus the error that caused it, if any.
#[derive(Debug, Clone)]
pub(crate) struct RecordReport {
    pub volume_id: String,
    pub outcome: RecordOutcome,
    pub failure: Option<PassFailure>,
}

impl RecordReport {
    pub fn new(volume_id: String, outcome: RecordOutcome) -> Self {
        Self {
            volume_id,
            outcome,
            failure: None,
        }
    }

    pub fn kept(volume_id: String, stage: FailureStage, reason: impl ToString) -> Self {
        let failure = PassFailure::volume(volume_id.clone(), stage, reason);
        Self {
            volume_id,
            outcome: RecordOutcome::Kept,
            failure: Some(failure),
        }
    }

    pub fn with_failure(mut self, failure: PassFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Aggregate result of one reconciliation pass. This is also the payload
/// handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassResult {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Unattached, non-exempt volumes found during discovery.
    pub candidates: Vec<String>,
    /// Volumes deleted this pass.
    pub deleted: Vec<String>,
    /// Volumes that would have been deleted, had dry run been off.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub would_delete: Vec<String>,
    /// Tracking records dropped because the volume vanished or was exempted.
    #[serde(default)]
    pub forgotten: Vec<String>,
    /// Tracked volumes left waiting.
    #[serde(default)]
    pub waiting: usize,
    pub failures: Vec<PassFailure>,
    /// The pass was cancelled or timed out before finishing.
    #[serde(default)]
    pub aborted: bool,
}

impl PassResult {
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            candidates: Vec::new(),
            deleted: Vec::new(),
            would_delete: Vec::new(),
            forgotten: Vec::new(),
            waiting: 0,
            failures: Vec::new(),
            aborted: false,
        }
    }

    /// Check if the pass deleted anything.
    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, report: RecordReport) {
        match report.outcome {
            RecordOutcome::Waiting | RecordOutcome::Deferred => self.waiting += 1,
            RecordOutcome::Deleted => self.deleted.push(report.volume_id),
            RecordOutcome::WouldDelete => self.would_delete.push(report.volume_id),
            RecordOutcome::Forgotten(_) => self.forgotten.push(report.volume_id),
            RecordOutcome::Kept => {}
        }
        if let Some(failure) = report.failure {
            self.failures.push(failure);
        }
    }

    /// Sort the id lists so summaries are stable regardless of task completion order.
    pub(crate) fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.deleted.sort();
        self.would_delete.sort();
        self.forgotten.sort();
    }
}
