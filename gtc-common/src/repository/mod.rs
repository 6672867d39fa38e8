//! Storage contract consumed by the curation core
//!
//! Optimistic concurrency lives entirely at this boundary: every mutation is
//! conditioned on the caller's etag and regenerates it on success.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

use crate::models::{ClaimFields, ClaimOutcome, GroundTruthItem};
use crate::Result;

pub use memory::InMemoryRepository;

/// Lazy, ordered stream of candidate items
pub type ItemStream<'a> = BoxStream<'a, Result<GroundTruthItem>>;

/// Item storage backend
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch one item; `Ok(None)` when absent
    async fn get_item(&self, dataset: &str, id: &str) -> Result<Option<GroundTruthItem>>;

    /// Self-serve candidates for a dataset.
    ///
    /// Skipped items come first, then unassigned drafts, each in creation
    /// order. Skipped items assigned to `excluding_user` are left out. The
    /// stream reads lazily, so items claimed mid-iteration may still appear
    /// and are resolved by the claim's etag check.
    fn list_unassigned_or_skipped(
        &self,
        dataset: &str,
        excluding_user: Option<&str>,
    ) -> ItemStream<'_>;

    /// Compare-and-swap claim: writes `fields` only if the stored etag equals
    /// `expected_etag`
    async fn try_claim(
        &self,
        dataset: &str,
        id: &str,
        expected_etag: &str,
        fields: &ClaimFields,
    ) -> Result<ClaimOutcome>;

    /// Create (`expected_etag == None`) or conditionally replace an item.
    ///
    /// Fails with `Error::ConcurrencyConflict` when the etag is stale, or when
    /// creating an item that already exists. Returns the stored item with its
    /// fresh etag.
    async fn upsert(
        &self,
        item: &GroundTruthItem,
        expected_etag: Option<&str>,
    ) -> Result<GroundTruthItem>;

    /// Item count per bucket for a dataset
    async fn bucket_counts(&self, dataset: &str) -> Result<BTreeMap<String, usize>>;
}

/// Fresh opaque concurrency token
pub fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}
