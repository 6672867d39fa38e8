//! Ground truth item model and assignment field types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Review status of a ground truth item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Draft,
    Approved,
    Deleted,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Approved => "approved",
            ItemStatus::Deleted => "deleted",
            ItemStatus::Skipped => "skipped",
        }
    }

    /// Approved and deleted items only move again through an admin override
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Approved | ItemStatus::Deleted)
    }

    /// Transitions permitted without override:
    /// draft -> {draft, approved, skipped, deleted}, skipped -> draft.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        match (self, next) {
            (ItemStatus::Draft, _) => true,
            (ItemStatus::Skipped, ItemStatus::Draft) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ItemStatus::Draft),
            "approved" => Ok(ItemStatus::Approved),
            "deleted" => Ok(ItemStatus::Deleted),
            "skipped" => Ok(ItemStatus::Skipped),
            other => Err(Error::InvalidInput(format!("unknown item status '{}'", other))),
        }
    }
}

/// Retrieval reference attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One prior turn of a multi-turn conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Curated question/answer/reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthItem {
    pub id: String,
    /// Filled from the import target when absent
    #[serde(default)]
    pub dataset_name: String,
    /// Opaque partition token, stamped once at import
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual_tags: Vec<String>,
    /// System-owned; overwritten on every persist path
    #[serde(default)]
    pub computed_tags: Vec<String>,
    /// Concurrency token; `None` until first persisted
    #[serde(default, rename = "_etag")]
    pub etag: Option<String>,

    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl GroundTruthItem {
    /// Create an unassigned draft with no content
    pub fn new(dataset_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dataset_name: dataset_name.into(),
            bucket: None,
            status: ItemStatus::Draft,
            assigned_to: None,
            assigned_at: None,
            manual_tags: Vec::new(),
            computed_tags: Vec::new(),
            etag: None,
            question: String::new(),
            answer: String::new(),
            references: Vec::new(),
            history: Vec::new(),
            comment: None,
            created_at: None,
            updated_at: None,
            updated_by: None,
            reviewed_at: None,
        }
    }

    /// "dataset/id", used in logs and error messages
    pub fn key(&self) -> String {
        item_key(&self.dataset_name, &self.id)
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.assigned_to.as_deref() == Some(user_id)
    }

    /// Eligible for self-serve: unassigned drafts, or skipped items.
    /// Whether the caller's own skipped items count is decided by the caller.
    pub fn is_self_serve_candidate(&self) -> bool {
        match self.status {
            ItemStatus::Draft => self.assigned_to.is_none(),
            ItemStatus::Skipped => true,
            _ => false,
        }
    }

    /// Apply claim fields in place
    pub fn apply_claim(&mut self, fields: &ClaimFields) {
        self.assigned_to = Some(fields.assigned_to.clone());
        self.assigned_at = Some(fields.assigned_at);
        self.status = fields.status;
    }
}

/// Format a dataset-scoped item key
pub fn item_key(dataset: &str, id: &str) -> String {
    format!("{}/{}", dataset, id)
}

/// Fields written by an optimistic claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFields {
    pub assigned_to: String,
    pub assigned_at: DateTime<Utc>,
    pub status: ItemStatus,
}

impl ClaimFields {
    /// Self-serve claim: assign now and move to draft
    pub fn for_user(user_id: &str) -> Self {
        Self {
            assigned_to: user_id.to_string(),
            assigned_at: Utc::now(),
            status: ItemStatus::Draft,
        }
    }
}

/// Outcome of a conditional claim at the storage boundary
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Claim accepted; carries the persisted item with its fresh etag
    Claimed(GroundTruthItem),
    /// Presented etag was stale (or the item vanished)
    Conflict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(ItemStatus::Draft.can_transition_to(ItemStatus::Approved));
        assert!(ItemStatus::Draft.can_transition_to(ItemStatus::Draft));
        assert!(ItemStatus::Skipped.can_transition_to(ItemStatus::Draft));
        assert!(!ItemStatus::Skipped.can_transition_to(ItemStatus::Approved));
        assert!(!ItemStatus::Approved.can_transition_to(ItemStatus::Draft));
        assert!(!ItemStatus::Deleted.can_transition_to(ItemStatus::Draft));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(" Skipped ".parse::<ItemStatus>().unwrap(), ItemStatus::Skipped);
        assert!("archived".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_self_serve_candidate() {
        let mut item = GroundTruthItem::new("ds", "q1");
        assert!(item.is_self_serve_candidate());

        item.apply_claim(&ClaimFields::for_user("alice"));
        assert!(!item.is_self_serve_candidate());
        assert!(item.is_owned_by("alice"));

        item.status = ItemStatus::Skipped;
        assert!(item.is_self_serve_candidate());

        item.status = ItemStatus::Approved;
        assert!(!item.is_self_serve_candidate());
    }

    #[test]
    fn test_item_json_shape() {
        let json = r#"{"id":"q1","datasetName":"ds","question":"What?","manualTags":["topic:general"]}"#;
        let item: GroundTruthItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.dataset_name, "ds");
        assert_eq!(item.status, ItemStatus::Draft);
        assert!(item.bucket.is_none());
        assert_eq!(item.manual_tags, vec!["topic:general".to_string()]);
    }
}
