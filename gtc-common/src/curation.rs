//! Import, edit and tag recompute paths
//!
//! Every path that persists an item runs the tag pipeline first, so manual
//! tags are always valid and computed tags always reflect the stored content.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::buckets::assign_buckets;
use crate::models::{item_key, GroundTruthItem, HistoryTurn, ItemStatus, Reference};
use crate::repository::Repository;
use crate::tags::TagPipeline;
use crate::{Error, Result};

/// Partial edit of an item's curated content
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEdit {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub references: Option<Vec<Reference>>,
    pub history: Option<Vec<HistoryTurn>>,
    pub manual_tags: Option<Vec<String>>,
    pub comment: Option<String>,
}

impl ItemEdit {
    fn apply_to(self, item: &mut GroundTruthItem) {
        if let Some(question) = self.question {
            item.question = question;
        }
        if let Some(answer) = self.answer {
            item.answer = answer;
        }
        if let Some(references) = self.references {
            item.references = references;
        }
        if let Some(history) = self.history {
            item.history = history;
        }
        if let Some(tags) = self.manual_tags {
            item.manual_tags = tags;
        }
        if let Some(comment) = self.comment {
            item.comment = Some(comment);
        }
    }
}

/// Result of an import batch
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub dataset: String,
    pub imported: usize,
    /// Ids already stored; left untouched
    pub skipped_existing: Vec<String>,
    /// Per-bucket counts after the import
    pub buckets: BTreeMap<String, usize>,
    /// Manual tags outside the catalog (accepted)
    pub unknown_tags: usize,
}

/// Persist paths for item content and tags
pub struct Curator {
    repo: Arc<dyn Repository>,
    pipeline: TagPipeline,
    bucket_count: usize,
}

impl Curator {
    pub fn new(repo: Arc<dyn Repository>, pipeline: TagPipeline, bucket_count: usize) -> Self {
        Self {
            repo,
            pipeline,
            bucket_count,
        }
    }

    pub fn pipeline(&self) -> &TagPipeline {
        &self.pipeline
    }

    /// Import a batch into `dataset`.
    ///
    /// Buckets are stamped, tags validated and computed for the whole batch
    /// before anything is written; one invalid tag set aborts the import.
    /// Ids created by a concurrent import between the existence check and the
    /// write are reported in `skipped_existing`. A storage error mid-batch
    /// returns the error and leaves earlier items written.
    pub async fn import_items(
        &self,
        dataset: &str,
        items: Vec<GroundTruthItem>,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary {
            dataset: dataset.to_string(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(items.len());
        for mut item in items {
            if item.id.trim().is_empty() {
                return Err(Error::InvalidInput("item id must not be empty".to_string()));
            }
            if item.dataset_name.is_empty() {
                item.dataset_name = dataset.to_string();
            }
            if !seen.insert(item.id.clone()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate id in batch: {}",
                    item_key(dataset, &item.id)
                )));
            }
            if self.repo.get_item(dataset, &item.id).await?.is_some() {
                warn!(item = %item_key(dataset, &item.id), "Item already stored, skipping");
                summary.skipped_existing.push(item.id);
                continue;
            }

            // Assignment state belongs to the coordinator
            item.assigned_to = None;
            item.assigned_at = None;
            item.etag = None;
            if item.status != ItemStatus::Draft {
                warn!(item = %item.key(), status = %item.status, "Imported item reset to draft");
                item.status = ItemStatus::Draft;
            }
            batch.push(item);
        }

        let existing = self.repo.bucket_counts(dataset).await?;
        summary.buckets = assign_buckets(&mut batch, dataset, self.bucket_count, &existing)?;

        for item in batch.iter_mut() {
            summary.unknown_tags += self.pipeline.apply(item)?;
        }

        let mut raced = false;
        for item in &batch {
            match self.repo.upsert(item, None).await {
                Ok(_) => summary.imported += 1,
                Err(Error::ConcurrencyConflict(_)) => {
                    warn!(item = %item.key(), "Item created concurrently, skipping");
                    summary.skipped_existing.push(item.id.clone());
                    raced = true;
                }
                Err(e) => return Err(e),
            }
        }
        if raced {
            summary.buckets = self.repo.bucket_counts(dataset).await?;
        }

        info!(
            dataset,
            imported = summary.imported,
            skipped = summary.skipped_existing.len(),
            buckets = summary.buckets.len(),
            "Import complete"
        );
        Ok(summary)
    }

    /// Apply an edit to a draft item owned by `actor` (or unassigned)
    pub async fn update_item(
        &self,
        dataset: &str,
        id: &str,
        edit: ItemEdit,
        etag: &str,
        actor: &str,
    ) -> Result<GroundTruthItem> {
        let mut item = self
            .repo
            .get_item(dataset, id)
            .await?
            .ok_or_else(|| Error::NotFound(item_key(dataset, id)))?;

        if item.etag.as_deref() != Some(etag) {
            return Err(Error::ConcurrencyConflict(item.key()));
        }
        if let Some(owner) = item.assigned_to.as_deref() {
            if owner != actor {
                return Err(Error::AssignmentConflict {
                    item: item.key(),
                    owner: owner.to_string(),
                });
            }
        }
        if item.status != ItemStatus::Draft {
            return Err(Error::InvalidTransition {
                item: item.key(),
                from: item.status.to_string(),
                to: ItemStatus::Draft.to_string(),
            });
        }

        edit.apply_to(&mut item);
        item.updated_by = Some(actor.to_string());
        self.pipeline.apply(&mut item)?;

        let stored = self.repo.upsert(&item, Some(etag)).await?;
        info!(item = %stored.key(), actor, "Item updated");
        Ok(stored)
    }

    /// Re-run the tag pipeline on the stored item; writes only when tags change
    pub async fn recompute_tags(&self, dataset: &str, id: &str) -> Result<GroundTruthItem> {
        let stored = self
            .repo
            .get_item(dataset, id)
            .await?
            .ok_or_else(|| Error::NotFound(item_key(dataset, id)))?;

        let mut item = stored.clone();
        self.pipeline.apply(&mut item)?;
        if item.manual_tags == stored.manual_tags && item.computed_tags == stored.computed_tags {
            return Ok(stored);
        }

        let updated = self.repo.upsert(&item, stored.etag.as_deref()).await?;
        info!(item = %updated.key(), tags = ?updated.computed_tags, "Computed tags refreshed");
        Ok(updated)
    }
}
