//! SQLite item repository
//!
//! Conditional writes are single `UPDATE ... WHERE etag = ? RETURNING ...`
//! statements, so the compare-and-swap is atomic in the database. Candidate
//! listing pages through the table by creation sequence and releases the
//! connection between pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::models::{item_key, ClaimFields, ClaimOutcome, GroundTruthItem, HistoryTurn, Reference};
use crate::repository::{new_etag, ItemStream, Repository};
use crate::{Error, Result};

const ITEM_COLUMNS: &str = "seq, dataset_name, id, bucket, status, assigned_to, assigned_at, etag, \
     manual_tags, computed_tags, payload, created_at, updated_at";

const CANDIDATE_PAGE_SIZE: i64 = 32;

/// Content columns stored as one JSON document
#[derive(Debug, Default, Serialize, Deserialize)]
struct ItemPayload {
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    references: Vec<Reference>,
    #[serde(default)]
    history: Vec<HistoryTurn>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
    #[serde(default)]
    reviewed_at: Option<DateTime<Utc>>,
}

impl ItemPayload {
    fn from_item(item: &GroundTruthItem) -> Self {
        Self {
            question: item.question.clone(),
            answer: item.answer.clone(),
            references: item.references.clone(),
            history: item.history.clone(),
            comment: item.comment.clone(),
            updated_by: item.updated_by.clone(),
            reviewed_at: item.reviewed_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CandidatePhase {
    Skipped,
    Unassigned,
}

fn row_to_item(row: &SqliteRow) -> Result<GroundTruthItem> {
    let status: String = row.try_get("status")?;
    let manual_tags: String = row.try_get("manual_tags")?;
    let computed_tags: String = row.try_get("computed_tags")?;
    let payload: String = row.try_get("payload")?;
    let payload: ItemPayload = serde_json::from_str(&payload)?;

    Ok(GroundTruthItem {
        id: row.try_get("id")?,
        dataset_name: row.try_get("dataset_name")?,
        bucket: row.try_get("bucket")?,
        status: status.parse()?,
        assigned_to: row.try_get("assigned_to")?,
        assigned_at: row.try_get("assigned_at")?,
        manual_tags: serde_json::from_str(&manual_tags)?,
        computed_tags: serde_json::from_str(&computed_tags)?,
        etag: Some(row.try_get("etag")?),
        question: payload.question,
        answer: payload.answer,
        references: payload.references,
        history: payload.history,
        comment: payload.comment,
        created_at: Some(row.try_get("created_at")?),
        updated_at: Some(row.try_get("updated_at")?),
        updated_by: payload.updated_by,
        reviewed_at: payload.reviewed_at,
    })
}

/// Repository over a SQLite pool created by [`crate::db::init_database`]
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of stored items in a dataset
    pub async fn count_items(&self, dataset: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE dataset_name = ?")
            .bind(dataset)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn fetch_candidate_page(
    pool: &SqlitePool,
    dataset: &str,
    excluding_user: Option<&str>,
    phase: CandidatePhase,
    after_seq: i64,
) -> Result<Vec<(i64, GroundTruthItem)>> {
    let rows = match phase {
        CandidatePhase::Skipped => {
            let sql = format!(
                "SELECT {} FROM items WHERE dataset_name = ? AND status = 'skipped' \
                 AND (assigned_to IS NULL OR ? IS NULL OR assigned_to <> ?) \
                 AND seq > ? ORDER BY seq LIMIT ?",
                ITEM_COLUMNS
            );
            sqlx::query(&sql)
                .bind(dataset)
                .bind(excluding_user)
                .bind(excluding_user)
                .bind(after_seq)
                .bind(CANDIDATE_PAGE_SIZE)
                .fetch_all(pool)
                .await?
        }
        CandidatePhase::Unassigned => {
            let sql = format!(
                "SELECT {} FROM items WHERE dataset_name = ? AND status = 'draft' \
                 AND assigned_to IS NULL AND seq > ? ORDER BY seq LIMIT ?",
                ITEM_COLUMNS
            );
            sqlx::query(&sql)
                .bind(dataset)
                .bind(after_seq)
                .bind(CANDIDATE_PAGE_SIZE)
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter()
        .map(|row| -> Result<(i64, GroundTruthItem)> {
            Ok((row.try_get("seq")?, row_to_item(row)?))
        })
        .collect()
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_item(&self, dataset: &str, id: &str) -> Result<Option<GroundTruthItem>> {
        let sql = format!(
            "SELECT {} FROM items WHERE dataset_name = ? AND id = ?",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(dataset)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_item).transpose()
    }

    fn list_unassigned_or_skipped(
        &self,
        dataset: &str,
        excluding_user: Option<&str>,
    ) -> ItemStream<'_> {
        let pool = self.pool.clone();
        let dataset = dataset.to_string();
        let excluding = excluding_user.map(str::to_string);

        Box::pin(async_stream::stream! {
            for phase in [CandidatePhase::Skipped, CandidatePhase::Unassigned] {
                let mut after_seq = 0i64;
                loop {
                    let page = match fetch_candidate_page(
                        &pool,
                        &dataset,
                        excluding.as_deref(),
                        phase,
                        after_seq,
                    )
                    .await
                    {
                        Ok(page) => page,
                        Err(e) => {
                            yield Err::<GroundTruthItem, Error>(e);
                            return;
                        }
                    };

                    let last_page = (page.len() as i64) < CANDIDATE_PAGE_SIZE;
                    for (seq, item) in page {
                        after_seq = seq;
                        yield Ok(item);
                    }
                    if last_page {
                        break;
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
        let sql = format!(
            "UPDATE items SET assigned_to = ?, assigned_at = ?, status = ?, etag = ?, updated_at = ? \
             WHERE dataset_name = ? AND id = ? AND etag = ? RETURNING {}",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&fields.assigned_to)
            .bind(fields.assigned_at)
            .bind(fields.status.as_str())
            .bind(new_etag())
            .bind(Utc::now())
            .bind(dataset)
            .bind(id)
            .bind(expected_etag)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(row_to_item(&row)?)),
            None => Ok(ClaimOutcome::Conflict),
        }
    }

    async fn upsert(
        &self,
        item: &GroundTruthItem,
        expected_etag: Option<&str>,
    ) -> Result<GroundTruthItem> {
        let key = item_key(&item.dataset_name, &item.id);
        let now = Utc::now();
        let manual_tags = serde_json::to_string(&item.manual_tags)?;
        let computed_tags = serde_json::to_string(&item.computed_tags)?;
        let payload = serde_json::to_string(&ItemPayload::from_item(item))?;

        let Some(expected) = expected_etag else {
            let sql = format!(
                "INSERT INTO items (dataset_name, id, bucket, status, assigned_to, assigned_at, etag, \
                 manual_tags, computed_tags, payload, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {}",
                ITEM_COLUMNS
            );
            let inserted = sqlx::query(&sql)
                .bind(&item.dataset_name)
                .bind(&item.id)
                .bind(&item.bucket)
                .bind(item.status.as_str())
                .bind(&item.assigned_to)
                .bind(item.assigned_at)
                .bind(new_etag())
                .bind(&manual_tags)
                .bind(&computed_tags)
                .bind(&payload)
                .bind(item.created_at.unwrap_or(now))
                .bind(now)
                .fetch_one(&self.pool)
                .await;

            return match inserted {
                Ok(row) => row_to_item(&row),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(Error::ConcurrencyConflict(format!("{} already exists", key)))
                }
                Err(e) => Err(e.into()),
            };
        };

        // Bucket and created_at are fixed at first write
        let sql = format!(
            "UPDATE items SET status = ?, assigned_to = ?, assigned_at = ?, etag = ?, \
             manual_tags = ?, computed_tags = ?, payload = ?, updated_at = ? \
             WHERE dataset_name = ? AND id = ? AND etag = ? RETURNING {}",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(item.status.as_str())
            .bind(&item.assigned_to)
            .bind(item.assigned_at)
            .bind(new_etag())
            .bind(&manual_tags)
            .bind(&computed_tags)
            .bind(&payload)
            .bind(now)
            .bind(&item.dataset_name)
            .bind(&item.id)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_item(&row),
            None => match self.get_item(&item.dataset_name, &item.id).await? {
                Some(_) => Err(Error::ConcurrencyConflict(key)),
                None => Err(Error::NotFound(key)),
            },
        }
    }

    async fn bucket_counts(&self, dataset: &str) -> Result<BTreeMap<String, usize>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT bucket, COUNT(*) FROM items \
             WHERE dataset_name = ? AND bucket IS NOT NULL GROUP BY bucket",
        )
        .bind(dataset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(bucket, count)| (bucket, count.max(0) as usize))
            .collect())
    }
}
