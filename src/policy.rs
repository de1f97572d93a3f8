//! Tag policy: the single place where a volume's tags are turned into a decision.
//!
//! Operators steer the workflow purely through tags:
//!
//! | Key                   | Effect                                                  |
//! |-----------------------|---------------------------------------------------------|
//! | `DoNotDelete`         | Exempt forever, whatever else is set                    |
//! | `Delete`              | Approved for deletion when the value is truthy          |
//! | `TagUpdatedBy`        | Provenance written by the reaper, never read            |
//! | `CleanupTagUpdatedOn` | Provenance written by the reaper, never read            |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;

/// Tag key whose presence exempts a volume.
pub const DO_NOT_DELETE_TAG: &str = "DoNotDelete";
/// Tag key that approves deletion when its value is truthy.
pub const DELETE_TAG: &str = "Delete";
/// Provenance tag naming the actor that marked the volume.
pub const UPDATED_BY_TAG: &str = "TagUpdatedBy";
/// Provenance tag recording when the volume was marked.
pub const UPDATED_ON_TAG: &str = "CleanupTagUpdatedOn";
/// Value written to the `Delete` tag when marking a volume.
pub const DELETE_MARK_VALUE: &str = "true";

/// A volume's tags. Keys are unique; inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// What the tags say should happen to a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// An operator asked for the volume to be kept.
    Exempt,
    /// The volume carries an approving `Delete` tag.
    DeleteApproved,
    /// Neither exempt nor approved yet.
    Undecided,
}

/// Classifies tag sets against the configured truthy values.
#[derive(Debug, Clone)]
pub struct TagPolicy {
    truthy_values: Vec<String>,
}

impl TagPolicy {
    pub fn new<I, S>(truthy_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            truthy_values: truthy_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.truthy_values.iter().cloned())
    }

    /// Whether a `Delete` tag value counts as approval.
    ///
    /// Values are compared exactly, so `" true "` does not match `"true"`.
    /// Empty and `false` are never truthy, even if configured as such.
    pub fn is_truthy(&self, value: &str) -> bool {
        if value.is_empty() || value.eq_ignore_ascii_case("false") {
            return false;
        }
        self.truthy_values.iter().any(|t| t == value)
    }

    /// Decide a volume's disposition from its current tags.
    ///
    /// `DoNotDelete` wins over everything, including an approving `Delete` tag.
    pub fn classify(&self, tags: &TagSet) -> Disposition {
        if tags.contains_key(DO_NOT_DELETE_TAG) {
            return Disposition::Exempt;
        }

        match tags.get(DELETE_TAG) {
            Some(value) if self.is_truthy(value) => Disposition::DeleteApproved,
            _ => Disposition::Undecided,
        }
    }
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}
