//! Keyed settings: global tag list and per-dataset curation instructions
//!
//! Plain key-value rows in the `settings` table. No concurrency tokens; last
//! write wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::tags::normalize_tag;
use crate::Result;

const GLOBAL_TAGS_KEY: &str = "global_tags";

fn instructions_key(dataset: &str) -> String {
    format!("dataset_instructions:{}", dataset)
}

/// Globally suggested tags, normalized and sorted
pub async fn get_global_tags(db: &SqlitePool) -> Result<Vec<String>> {
    Ok(get_json_setting::<Vec<String>>(db, GLOBAL_TAGS_KEY)
        .await?
        .unwrap_or_default())
}

/// Replace the global tag list; every entry must be a valid "group:value"
pub async fn set_global_tags(db: &SqlitePool, tags: &[String]) -> Result<Vec<String>> {
    let normalized: BTreeSet<String> = tags
        .iter()
        .map(|t| normalize_tag(t))
        .collect::<Result<_>>()?;
    let normalized: Vec<String> = normalized.into_iter().collect();
    set_json_setting(db, GLOBAL_TAGS_KEY, &normalized).await?;
    Ok(normalized)
}

/// Curation instructions shown to annotators for a dataset
pub async fn get_dataset_instructions(db: &SqlitePool, dataset: &str) -> Result<Option<String>> {
    get_json_setting::<String>(db, &instructions_key(dataset)).await
}

pub async fn set_dataset_instructions(db: &SqlitePool, dataset: &str, text: &str) -> Result<()> {
    set_json_setting(db, &instructions_key(dataset), &text.to_string()).await
}

async fn get_json_setting<T: DeserializeOwned>(db: &SqlitePool, key: &str) -> Result<Option<T>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

async fn set_json_setting<T: Serialize>(db: &SqlitePool, key: &str, value: &T) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(serde_json::to_string(value)?)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::Error;

    #[tokio::test]
    async fn test_global_tags_round_trip() {
        let pool = init_memory_database().await.unwrap();
        assert!(get_global_tags(&pool).await.unwrap().is_empty());

        let stored = set_global_tags(
            &pool,
            &["Topic:General".to_string(), "source:sme".to_string(), "topic:general".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(stored, vec!["source:sme", "topic:general"]);
        assert_eq!(get_global_tags(&pool).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_global_tags_reject_malformed() {
        let pool = init_memory_database().await.unwrap();
        let err = set_global_tags(&pool, &["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::TagFormat(_)));
    }

    #[tokio::test]
    async fn test_dataset_instructions() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(get_dataset_instructions(&pool, "faq").await.unwrap(), None);

        set_dataset_instructions(&pool, "faq", "Verify every link.").await.unwrap();
        set_dataset_instructions(&pool, "faq", "Verify every link twice.").await.unwrap();
        assert_eq!(
            get_dataset_instructions(&pool, "faq").await.unwrap().as_deref(),
            Some("Verify every link twice.")
        );
        assert_eq!(get_dataset_instructions(&pool, "other").await.unwrap(), None);
    }
}
