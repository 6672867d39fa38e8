//! Bucket assignment for imported items
//!
//! Buckets spread a dataset's items evenly for sampling. An item keeps its
//! bucket forever once stamped; new items fill the least-loaded bucket, which
//! degenerates to round-robin when counts start balanced.

use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::GroundTruthItem;
use crate::{Error, Result};

/// Mint an opaque bucket token
pub fn new_bucket_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stamp a bucket on every item of `dataset` that lacks one.
///
/// `existing_buckets` holds per-bucket counts already persisted for the
/// dataset. Items in `items` that already carry a bucket keep it and count
/// toward balance. Returns the per-bucket counts after assignment (persisted
/// plus this batch). Only buckets holding at least one item are reported.
pub fn assign_buckets(
    items: &mut [GroundTruthItem],
    dataset: &str,
    bucket_count: usize,
    existing_buckets: &BTreeMap<String, usize>,
) -> Result<BTreeMap<String, usize>> {
    if let Some(stray) = items.iter().find(|i| i.dataset_name != dataset) {
        return Err(Error::InvalidInput(format!(
            "item {} does not belong to dataset '{}'",
            stray.key(),
            dataset
        )));
    }

    // Pool order decides ties: persisted buckets, then batch buckets, then minted ones
    let mut pool: Vec<(String, usize)> = existing_buckets
        .iter()
        .map(|(b, c)| (b.clone(), *c))
        .collect();

    for item in items.iter() {
        if let Some(bucket) = &item.bucket {
            match pool.iter_mut().find(|(b, _)| b == bucket) {
                Some((_, count)) => *count += 1,
                None => pool.push((bucket.clone(), 1)),
            }
        }
    }

    let unbucketed = items.iter().filter(|i| i.bucket.is_none()).count();
    if unbucketed > 0 && bucket_count == 0 {
        return Err(Error::InvalidInput(
            "bucket_count must be at least 1".to_string(),
        ));
    }

    while pool.len() < bucket_count {
        pool.push((new_bucket_id(), 0));
    }

    for item in items.iter_mut().filter(|i| i.bucket.is_none()) {
        // min_by_key returns the first minimum, keeping pool order for ties
        let slot = pool
            .iter_mut()
            .min_by_key(|(_, count)| *count)
            .ok_or_else(|| Error::Internal("empty bucket pool".to_string()))?;
        slot.1 += 1;
        item.bucket = Some(slot.0.clone());
    }

    debug!(
        dataset,
        assigned = unbucketed,
        buckets = pool.len(),
        "Assigned buckets"
    );

    Ok(pool.into_iter().filter(|(_, c)| *c > 0).collect())
}
