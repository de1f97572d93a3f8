//! Two-phase delayed deletion of unattached block-storage volumes.
//!
//! An unattached volume is first marked with deletion tags and tracked with
//! its first-seen time. A later pass deletes it only if its live tags still
//! approve deletion, no `DoNotDelete` exemption has appeared, and the grace
//! period has elapsed. Each pass ends with a summary notification.
//!
//! The reconciler talks to three adapters injected as trait objects:
//! [`inventory::VolumeInventory`], [`tracking::TrackingStore`] and
//! [`notify::Notifier`]. Each has in-memory, local and cloud backends
//! selected through [`config::ReaperConfig`].

#[cfg(feature = "aws")]
mod aws;
pub mod config;
pub mod inventory;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod reconciler;
pub mod tracking;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, ReaperConfig};
pub use policy::{Disposition, TagPolicy, TagSet};
pub use reconciler::{
    PassFailure, PassResult, Reconciler, SetupError, run_reconciliation_pass,
    start_reconciler_worker,
};
