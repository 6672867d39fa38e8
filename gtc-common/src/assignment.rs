//! Assignment coordination
//!
//! Self-serve claiming, manual assignment and status transitions. The only
//! synchronization is the etag compare-and-swap at the repository boundary:
//! a stale etag during self-serve means another request won that item, so
//! the coordinator moves on to the next candidate instead of retrying it.
//! Claims already made stay claimed if a request is cancelled or fails
//! part-way.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::allocation::compute_quotas;
use crate::models::{item_key, ClaimFields, ClaimOutcome, GroundTruthItem, ItemStatus};
use crate::repository::Repository;
use crate::{Error, Result};

/// Self-serve eligibility policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelfServePolicy {
    /// Let a user re-claim items they skipped themselves
    #[serde(default)]
    pub allow_own_skipped: bool,
}

/// Outcome of a self-serve request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfServeResult {
    pub items: Vec<GroundTruthItem>,
    pub assigned_count: usize,
    pub requested: usize,
    /// Per-dataset quotas used for this request
    pub quotas: BTreeMap<String, usize>,
    /// Candidates lost to concurrent claims
    pub conflicts: usize,
}

/// Orchestrates every mutation of assignment fields
pub struct AssignmentCoordinator {
    repo: Arc<dyn Repository>,
    weights: BTreeMap<String, f64>,
    policy: SelfServePolicy,
}

impl AssignmentCoordinator {
    pub fn new(
        repo: Arc<dyn Repository>,
        weights: BTreeMap<String, f64>,
        policy: SelfServePolicy,
    ) -> Self {
        Self { repo, weights, policy }
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn policy(&self) -> SelfServePolicy {
        self.policy
    }

    /// Claim up to `limit` items for `user_id`, spread across datasets by weight.
    ///
    /// Returning fewer than `limit` items is not an error.
    pub async fn self_serve(&self, user_id: &str, limit: usize) -> Result<SelfServeResult> {
        let user_id = require_user(user_id)?;
        let quotas = compute_quotas(&self.weights, limit);

        let mut result = SelfServeResult {
            requested: limit,
            quotas: quotas.clone(),
            ..Default::default()
        };

        for (dataset, quota) in quotas.iter().filter(|(_, q)| **q > 0) {
            let (claimed, conflicts) = self.claim_from_dataset(user_id, dataset, *quota).await?;
            if claimed.len() < *quota {
                debug!(
                    dataset = %dataset,
                    quota,
                    claimed = claimed.len(),
                    "Candidates exhausted before quota"
                );
            }
            result.conflicts += conflicts;
            result.items.extend(claimed);
        }

        result.assigned_count = result.items.len();
        info!(
            user = user_id,
            requested = limit,
            assigned = result.assigned_count,
            conflicts = result.conflicts,
            "Self-serve assignment complete"
        );
        Ok(result)
    }

    async fn claim_from_dataset(
        &self,
        user_id: &str,
        dataset: &str,
        quota: usize,
    ) -> Result<(Vec<GroundTruthItem>, usize)> {
        let excluding = if self.policy.allow_own_skipped {
            None
        } else {
            Some(user_id)
        };

        let mut candidates = self.repo.list_unassigned_or_skipped(dataset, excluding);
        let mut claimed = Vec::with_capacity(quota);
        let mut conflicts = 0;

        while claimed.len() < quota {
            let Some(candidate) = candidates.next().await else {
                break;
            };
            let candidate = candidate?;

            let Some(etag) = candidate.etag.as_deref() else {
                warn!(item = %candidate.key(), "Candidate without etag, skipping");
                continue;
            };

            let fields = ClaimFields::for_user(user_id);
            match self.repo.try_claim(dataset, &candidate.id, etag, &fields).await? {
                ClaimOutcome::Claimed(item) => {
                    debug!(item = %item.key(), user = user_id, "Claimed item");
                    claimed.push(item);
                }
                ClaimOutcome::Conflict => {
                    debug!(item = %candidate.key(), user = user_id, "Lost claim race, trying next candidate");
                    conflicts += 1;
                }
            }
        }

        Ok((claimed, conflicts))
    }

    /// Assign one item to `user_id`, conditioned on the caller's etag
    pub async fn manual_assign(
        &self,
        dataset: &str,
        item_id: &str,
        user_id: &str,
        etag: &str,
        allow_override: bool,
    ) -> Result<GroundTruthItem> {
        let user_id = require_user(user_id)?;
        let item = self.load(dataset, item_id, etag).await?;

        if let Some(owner) = item.assigned_to.as_deref() {
            if owner != user_id && !allow_override {
                return Err(Error::AssignmentConflict {
                    item: item.key(),
                    owner: owner.to_string(),
                });
            }
        }
        if item.status.is_terminal() && !allow_override {
            return Err(Error::InvalidTransition {
                item: item.key(),
                from: item.status.to_string(),
                to: ItemStatus::Draft.to_string(),
            });
        }

        match self
            .repo
            .try_claim(dataset, item_id, etag, &ClaimFields::for_user(user_id))
            .await?
        {
            ClaimOutcome::Claimed(item) => {
                info!(item = %item.key(), user = user_id, allow_override, "Manually assigned item");
                Ok(item)
            }
            ClaimOutcome::Conflict => Err(Error::ConcurrencyConflict(item_key(dataset, item_id))),
        }
    }

    /// Move an item through the status state machine.
    ///
    /// Without override only the assignee may act, and only along
    /// draft -> {draft, approved, skipped, deleted} or skipped -> draft.
    pub async fn transition_status(
        &self,
        dataset: &str,
        item_id: &str,
        actor: &str,
        next: ItemStatus,
        etag: &str,
        allow_override: bool,
    ) -> Result<GroundTruthItem> {
        let actor = require_user(actor)?;
        let item = self.load(dataset, item_id, etag).await?;

        if !allow_override {
            if !item.is_owned_by(actor) {
                return Err(Error::AssignmentConflict {
                    item: item.key(),
                    owner: item.assigned_to.clone().unwrap_or_else(|| "<unassigned>".to_string()),
                });
            }
            if !item.status.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    item: item.key(),
                    from: item.status.to_string(),
                    to: next.to_string(),
                });
            }
        }

        let previous = item.status;
        let mut updated = item;
        updated.status = next;
        updated.updated_by = Some(actor.to_string());
        if next == ItemStatus::Approved {
            updated.reviewed_at = Some(Utc::now());
        }

        let stored = self.repo.upsert(&updated, Some(etag)).await?;
        info!(
            item = %stored.key(),
            actor,
            from = %previous,
            to = %next,
            "Status transition"
        );
        Ok(stored)
    }

    /// Hand a draft back to the unassigned pool
    pub async fn release(
        &self,
        dataset: &str,
        item_id: &str,
        user_id: &str,
        etag: &str,
    ) -> Result<GroundTruthItem> {
        let user_id = require_user(user_id)?;
        let item = self.load(dataset, item_id, etag).await?;

        if !item.is_owned_by(user_id) {
            return Err(Error::AssignmentConflict {
                item: item.key(),
                owner: item.assigned_to.clone().unwrap_or_else(|| "<unassigned>".to_string()),
            });
        }
        if item.status != ItemStatus::Draft {
            return Err(Error::InvalidTransition {
                item: item.key(),
                from: item.status.to_string(),
                to: "unassigned".to_string(),
            });
        }

        let mut updated = item;
        updated.assigned_to = None;
        updated.assigned_at = None;
        updated.updated_by = Some(user_id.to_string());

        let stored = self.repo.upsert(&updated, Some(etag)).await?;
        info!(item = %stored.key(), user = user_id, "Released item");
        Ok(stored)
    }

    /// Fetch an item and check the caller's etag before any rule evaluation
    async fn load(&self, dataset: &str, item_id: &str, etag: &str) -> Result<GroundTruthItem> {
        let item = self
            .repo
            .get_item(dataset, item_id)
            .await?
            .ok_or_else(|| Error::NotFound(item_key(dataset, item_id)))?;

        if item.etag.as_deref() != Some(etag) {
            return Err(Error::ConcurrencyConflict(item.key()));
        }
        Ok(item)
    }
}

fn require_user(user_id: &str) -> Result<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("user id must not be empty".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    async fn setup(items: &[(&str, &str)]) -> (Arc<InMemoryRepository>, AssignmentCoordinator) {
        let repo = Arc::new(InMemoryRepository::new());
        for (dataset, id) in items {
            repo.upsert(&GroundTruthItem::new(*dataset, *id), None).await.unwrap();
        }
        let weights = [("ds".to_string(), 1.0)].into_iter().collect();
        let coordinator = AssignmentCoordinator::new(repo.clone(), weights, SelfServePolicy::default());
        (repo, coordinator)
    }

    async fn etag_of(repo: &InMemoryRepository, id: &str) -> String {
        repo.get_item("ds", id).await.unwrap().unwrap().etag.unwrap()
    }

    #[tokio::test]
    async fn test_self_serve_claims_up_to_limit() {
        let (_repo, coordinator) = setup(&[("ds", "q1"), ("ds", "q2"), ("ds", "q3")]).await;
        let result = coordinator.self_serve("alice", 2).await.unwrap();
        assert_eq!(result.assigned_count, 2);
        assert!(result.items.iter().all(|i| i.is_owned_by("alice")));
        assert_eq!(result.items[0].id, "q1");
        assert_eq!(result.items[1].id, "q2");
    }

    #[tokio::test]
    async fn test_self_serve_short_pool_is_not_an_error() {
        let (_repo, coordinator) = setup(&[("ds", "q1")]).await;
        let result = coordinator.self_serve("alice", 5).await.unwrap();
        assert_eq!(result.assigned_count, 1);
        assert_eq!(result.requested, 5);

        let again = coordinator.self_serve("bob", 5).await.unwrap();
        assert_eq!(again.assigned_count, 0);
    }

    #[tokio::test]
    async fn test_self_serve_rejects_blank_user() {
        let (_repo, coordinator) = setup(&[("ds", "q1")]).await;
        assert!(matches!(
            coordinator.self_serve("  ", 1).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_assign_rules() {
        let (repo, coordinator) = setup(&[("ds", "q1")]).await;

        let etag = etag_of(&repo, "q1").await;
        let item = coordinator.manual_assign("ds", "q1", "alice", &etag, false).await.unwrap();
        assert!(item.is_owned_by("alice"));

        // Old etag is stale now
        let err = coordinator.manual_assign("ds", "q1", "bob", &etag, false).await.unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict(_)));

        let fresh = item.etag.clone().unwrap();
        let err = coordinator.manual_assign("ds", "q1", "bob", &fresh, false).await.unwrap_err();
        assert!(matches!(err, Error::AssignmentConflict { ref owner, .. } if owner == "alice"));

        let taken = coordinator.manual_assign("ds", "q1", "bob", &fresh, true).await.unwrap();
        assert!(taken.is_owned_by("bob"));
    }

    #[tokio::test]
    async fn test_manual_assign_missing_item() {
        let (_repo, coordinator) = setup(&[]).await;
        let err = coordinator.manual_assign("ds", "nope", "alice", "x", false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transition_state_machine() {
        let (repo, coordinator) = setup(&[("ds", "q1")]).await;
        let etag = etag_of(&repo, "q1").await;
        let item = coordinator.manual_assign("ds", "q1", "alice", &etag, false).await.unwrap();

        // Only the assignee may transition
        let err = coordinator
            .transition_status("ds", "q1", "bob", ItemStatus::Approved, item.etag.as_deref().unwrap(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssignmentConflict { .. }));

        let approved = coordinator
            .transition_status("ds", "q1", "alice", ItemStatus::Approved, item.etag.as_deref().unwrap(), false)
            .await
            .unwrap();
        assert_eq!(approved.status, ItemStatus::Approved);
        assert!(approved.reviewed_at.is_some());

        // Terminal without override
        let err = coordinator
            .transition_status("ds", "q1", "alice", ItemStatus::Draft, approved.etag.as_deref().unwrap(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        // Admin override reopens
        let reopened = coordinator
            .transition_status("ds", "q1", "admin", ItemStatus::Draft, approved.etag.as_deref().unwrap(), true)
            .await
            .unwrap();
        assert_eq!(reopened.status, ItemStatus::Draft);
    }

    #[tokio::test]
    async fn test_skipped_item_reassigned_to_other_user() {
        let (repo, coordinator) = setup(&[("ds", "q1")]).await;
        let claimed = coordinator.self_serve("alice", 1).await.unwrap().items.remove(0);
        coordinator
            .transition_status("ds", "q1", "alice", ItemStatus::Skipped, claimed.etag.as_deref().unwrap(), false)
            .await
            .unwrap();

        // Alice does not get her own skip back by default
        assert_eq!(coordinator.self_serve("alice", 1).await.unwrap().assigned_count, 0);

        let result = coordinator.self_serve("bob", 1).await.unwrap();
        assert_eq!(result.assigned_count, 1);
        let item = repo.get_item("ds", "q1").await.unwrap().unwrap();
        assert!(item.is_owned_by("bob"));
        assert_eq!(item.status, ItemStatus::Draft);
    }

    #[tokio::test]
    async fn test_allow_own_skipped_policy() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.upsert(&GroundTruthItem::new("ds", "q1"), None).await.unwrap();
        let weights: BTreeMap<String, f64> = [("ds".to_string(), 1.0)].into_iter().collect();
        let coordinator = AssignmentCoordinator::new(
            repo.clone(),
            weights,
            SelfServePolicy { allow_own_skipped: true },
        );

        let claimed = coordinator.self_serve("alice", 1).await.unwrap().items.remove(0);
        coordinator
            .transition_status("ds", "q1", "alice", ItemStatus::Skipped, claimed.etag.as_deref().unwrap(), false)
            .await
            .unwrap();

        let again = coordinator.self_serve("alice", 1).await.unwrap();
        assert_eq!(again.assigned_count, 1);
        assert_eq!(again.items[0].status, ItemStatus::Draft);
    }

    #[tokio::test]
    async fn test_release_returns_item_to_pool() {
        let (_repo, coordinator) = setup(&[("ds", "q1")]).await;
        let claimed = coordinator.self_serve("alice", 1).await.unwrap().items.remove(0);

        let err = coordinator
            .release("ds", "q1", "bob", claimed.etag.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssignmentConflict { .. }));

        let released = coordinator
            .release("ds", "q1", "alice", claimed.etag.as_deref().unwrap())
            .await
            .unwrap();
        assert!(released.assigned_to.is_none());
        assert_eq!(coordinator.self_serve("bob", 1).await.unwrap().assigned_count, 1);
    }
}
