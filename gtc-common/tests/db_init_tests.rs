//! Database initialization and persistence across reopen

use std::sync::Arc;

use gtc_common::db::{
    get_dataset_instructions, get_global_tags, init_database, set_dataset_instructions,
    set_global_tags, SqliteRepository,
};
use gtc_common::tags::{ComputedTagRegistry, PluginFailurePolicy, TagValidator};
use gtc_common::{Curator, GroundTruthItem, Repository, TagPipeline};

fn curator(repo: Arc<dyn Repository>) -> Curator {
    let pipeline = TagPipeline::new(
        TagValidator::default(),
        ComputedTagRegistry::with_builtin_plugins(PluginFailurePolicy::FailFast).unwrap(),
    );
    Curator::new(repo, pipeline, 4)
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("gtc.db");
    assert!(!db_path.exists());

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("gtc.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());
    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_items_and_settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("gtc.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(pool.clone()));
        let mut item = GroundTruthItem::new("faq", "q1");
        item.question = "Where are invoices stored?".to_string();
        item.manual_tags = vec!["Source:SME".to_string(), "sme_domain:billing".to_string()];
        curator(repo).import_items("faq", vec![item]).await.unwrap();

        set_global_tags(&pool, &["topic:billing".to_string()]).await.unwrap();
        set_dataset_instructions(&pool, "faq", "Cite the billing handbook.")
            .await
            .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let repo = SqliteRepository::new(pool.clone());
    let item = repo.get_item("faq", "q1").await.unwrap().unwrap();
    assert_eq!(item.question, "Where are invoices stored?");
    assert_eq!(item.manual_tags, vec!["sme_domain:billing", "source:sme"]);
    assert!(item.bucket.is_some());
    assert!(item
        .computed_tags
        .iter()
        .any(|t| t == "retrieval_behavior:no_retrieval"));

    assert_eq!(get_global_tags(&pool).await.unwrap(), vec!["topic:billing"]);
    assert_eq!(
        get_dataset_instructions(&pool, "faq").await.unwrap().as_deref(),
        Some("Cite the billing handbook.")
    );
    assert_eq!(repo.count_items("faq").await.unwrap(), 1);
}

#[tokio::test]
async fn test_import_spreads_buckets_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("gtc.db")).await.unwrap();
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(pool));
    let curator = curator(repo.clone());

    let batch = |from: usize, to: usize| -> Vec<GroundTruthItem> {
        (from..to)
            .map(|n| GroundTruthItem::new("faq", format!("q{}", n)))
            .collect()
    };

    curator.import_items("faq", batch(0, 10)).await.unwrap();
    let summary = curator.import_items("faq", batch(10, 16)).await.unwrap();
    assert_eq!(summary.imported, 6);

    let counts = repo.bucket_counts("faq").await.unwrap();
    assert_eq!(counts.len(), 4);
    assert_eq!(counts.values().sum::<usize>(), 16);
    assert_eq!(counts.values().max(), Some(&4));
    assert_eq!(counts.values().min(), Some(&4));
}
