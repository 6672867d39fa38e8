//! In-memory repository
//!
//! Holds items behind a single `RwLock`; every conditional write checks the
//! etag under the write lock, which gives the same compare-and-swap semantics
//! as the SQLite store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{new_etag, ItemStream, Repository};
use crate::models::{item_key, ClaimFields, ClaimOutcome, GroundTruthItem, ItemStatus};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredItem {
    /// Creation sequence, fixes candidate ordering
    seq: u64,
    item: GroundTruthItem,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<(String, String), StoredItem>,
    next_seq: u64,
}

impl MemoryState {
    fn candidate_ids(&self, dataset: &str, excluding_user: Option<&str>) -> Vec<String> {
        let mut ranked: Vec<(u8, u64, &str)> = self
            .items
            .iter()
            .filter(|((ds, _), _)| ds == dataset)
            .filter(|(_, stored)| is_candidate(&stored.item, excluding_user))
            .map(|((_, id), stored)| {
                let rank = if stored.item.status == ItemStatus::Skipped { 0 } else { 1 };
                (rank, stored.seq, id.as_str())
            })
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, _, id)| id.to_string()).collect()
    }
}

fn is_candidate(item: &GroundTruthItem, excluding_user: Option<&str>) -> bool {
    if !item.is_self_serve_candidate() {
        return false;
    }
    match excluding_user {
        Some(user) => !item.is_owned_by(user),
        None => true,
    }
}

/// Repository backed by process memory; cheap to clone, clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items of a dataset in creation order
    pub async fn items(&self, dataset: &str) -> Vec<GroundTruthItem> {
        let state = self.state.read().await;
        let mut stored: Vec<&StoredItem> = state
            .items
            .iter()
            .filter(|((ds, _), _)| ds == dataset)
            .map(|(_, s)| s)
            .collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.item.clone()).collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_item(&self, dataset: &str, id: &str) -> Result<Option<GroundTruthItem>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .get(&(dataset.to_string(), id.to_string()))
            .map(|s| s.item.clone()))
    }

    fn list_unassigned_or_skipped(
        &self,
        dataset: &str,
        excluding_user: Option<&str>,
    ) -> ItemStream<'_> {
        let dataset = dataset.to_string();
        let excluding = excluding_user.map(str::to_string);
        let state = Arc::clone(&self.state);

        Box::pin(async_stream::stream! {
            let ids = state.read().await.candidate_ids(&dataset, excluding.as_deref());
            for id in ids {
                // Re-read each item so the stream reflects claims made since listing
                let current = state
                    .read()
                    .await
                    .items
                    .get(&(dataset.clone(), id))
                    .map(|s| s.item.clone());
                if let Some(item) = current {
                    if is_candidate(&item, excluding.as_deref()) {
                        yield Ok::<GroundTruthItem, Error>(item);
                    }
                }
            }
        })
    }

    async fn try_claim(
        &self,
        dataset: &str,
        id: &str,
        expected_etag: &str,
        fields: &ClaimFields,
    ) -> Result<ClaimOutcome> {
        let mut state = self.state.write().await;
        let Some(stored) = state.items.get_mut(&(dataset.to_string(), id.to_string())) else {
            return Ok(ClaimOutcome::Conflict);
        };
        if stored.item.etag.as_deref() != Some(expected_etag) {
            return Ok(ClaimOutcome::Conflict);
        }

        stored.item.apply_claim(fields);
        stored.item.updated_at = Some(Utc::now());
        stored.item.etag = Some(new_etag());
        Ok(ClaimOutcome::Claimed(stored.item.clone()))
    }

    async fn upsert(
        &self,
        item: &GroundTruthItem,
        expected_etag: Option<&str>,
    ) -> Result<GroundTruthItem> {
        let key = (item.dataset_name.clone(), item.id.clone());
        let display = item_key(&item.dataset_name, &item.id);
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(expected) = expected_etag else {
            if state.items.contains_key(&key) {
                return Err(Error::ConcurrencyConflict(format!("{} already exists", display)));
            }
            let mut created = item.clone();
            created.created_at = created.created_at.or(Some(now));
            created.updated_at = Some(now);
            created.etag = Some(new_etag());

            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.insert(key, StoredItem { seq, item: created.clone() });
            return Ok(created);
        };

        let stored = state
            .items
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(display.clone()))?;
        if stored.item.etag.as_deref() != Some(expected) {
            return Err(Error::ConcurrencyConflict(display));
        }

        let mut updated = item.clone();
        // Bucket and creation time are fixed at first write
        updated.bucket = stored.item.bucket.clone();
        updated.created_at = stored.item.created_at;
        updated.updated_at = Some(now);
        updated.etag = Some(new_etag());
        stored.item = updated.clone();
        Ok(updated)
    }

    async fn bucket_counts(&self, dataset: &str) -> Result<BTreeMap<String, usize>> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for ((ds, _), stored) in &state.items {
            if ds != dataset {
                continue;
            }
            if let Some(bucket) = &stored.item.bucket {
                *counts.entry(bucket.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
