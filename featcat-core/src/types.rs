//! Domain types for the feature catalog.
//!
//! `Feature` is the record stored one-per-file in the catalog and one-per-entry
//! in the local manifest. All transfers between replicas are by value.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A feature identifier, either synced (`FT-000123`) or local (`FT-LOCAL-…`).
///
/// Construction does not validate; use [`codec::is_valid_id`] or
/// [`FeatureId::is_valid`] at trust boundaries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub String);

impl FeatureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `FT-` followed by exactly six digits.
    pub fn is_synced(&self) -> bool {
        codec::is_synced_id(&self.0)
    }

    /// `FT-LOCAL-` followed by 1–64 of `[a-z0-9-]`.
    pub fn is_local(&self) -> bool {
        codec::is_local_id(&self.0)
    }

    pub fn is_valid(&self) -> bool {
        codec::is_valid_id(&self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of change a proposal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Past-tense verb used in commit messages and summaries.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Operation::Create => "added",
            Operation::Update => "updated",
            Operation::Delete => "removed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Which backing store implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Git,
    Http,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Git => write!(f, "git"),
            BackendMode::Http => write!(f, "http"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A single catalog feature.
///
/// Timestamps are `None` when a record was materialized without them; the
/// catalog codec fills them in on encode, never on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Feature {
    /// A feature with only the required fields set.
    pub fn new(id: impl Into<FeatureId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            summary: String::new(),
            owner: None,
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Tags as a set; order and duplicates are not significant.
    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }

    /// Compare user-visible content: name, summary, owner and the tag set.
    ///
    /// Identifiers and timestamps are ignored.
    pub fn same_content(&self, other: &Feature) -> bool {
        self.name == other.name
            && self.summary == other.summary
            && normalized_owner(&self.owner) == normalized_owner(&other.owner)
            && self.tag_set() == other.tag_set()
    }
}

fn normalized_owner(owner: &Option<String>) -> Option<&str> {
    owner.as_deref().filter(|o| !o.is_empty())
}

/// A partial update. Only non-empty fields overwrite the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl FeaturePatch {
    /// Build a patch that would turn any record into `feature`'s content.
    pub fn from_feature(feature: &Feature) -> Self {
        Self {
            name: Some(feature.name.clone()),
            summary: Some(feature.summary.clone()),
            owner: feature.owner.clone(),
            tags: Some(feature.tags.clone()),
        }
    }

    /// True when applying this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        non_empty(&self.name).is_none()
            && non_empty(&self.summary).is_none()
            && non_empty(&self.owner).is_none()
            && self.tags.as_ref().map_or(true, Vec::is_empty)
    }

    /// Overwrite `feature` with every non-empty field of the patch.
    pub fn apply_to(&self, feature: &mut Feature) {
        if let Some(name) = non_empty(&self.name) {
            feature.name = name.to_owned();
        }
        if let Some(summary) = non_empty(&self.summary) {
            feature.summary = summary.to_owned();
        }
        if let Some(owner) = non_empty(&self.owner) {
            feature.owner = Some(owner.to_owned());
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            feature.tags = tags.clone();
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
