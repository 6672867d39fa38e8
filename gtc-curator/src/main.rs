//! gtc-curator - Ground truth curation command line
//!
//! Imports datasets, hands out work through self-serve and manual assignment,
//! and drives items through their review lifecycle. Every command prints its
//! result as JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use gtc_common::allocation::compute_quotas;
use gtc_common::config::{resolve_config_path, resolve_database_path, TomlConfig};
use gtc_common::db::{self, SqliteRepository};
use gtc_common::tags::{ComputedTagRegistry, TagValidator};
use gtc_common::{
    AssignmentCoordinator, Curator, GroundTruthItem, ItemEdit, ItemStatus, Repository,
    TagPipeline,
};

/// Command-line arguments for gtc-curator
#[derive(Parser, Debug)]
#[command(name = "gtc-curator")]
#[command(about = "Ground truth dataset curation")]
#[command(version)]
struct Args {
    /// TOML configuration file (falls back to GTC_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (falls back to GTC_DATABASE)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a JSON array of items into a dataset
    Import { dataset: String, file: PathBuf },

    /// Claim a batch of items for a user across weighted datasets
    SelfServe {
        user: String,
        /// Defaults to self_serve.default_limit
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Assign one item to a user
    Assign {
        dataset: String,
        id: String,
        user: String,
        #[arg(long)]
        etag: String,
        /// Take the item even if someone else holds it
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// Move an item to draft, approved, skipped or deleted
    Status {
        dataset: String,
        id: String,
        actor: String,
        status: ItemStatus,
        #[arg(long)]
        etag: String,
        #[arg(long = "override")]
        allow_override: bool,
    },

    /// Give a claimed draft back to the pool
    Release {
        dataset: String,
        id: String,
        user: String,
        #[arg(long)]
        etag: String,
    },

    /// Apply a JSON edit document to an item
    Edit {
        dataset: String,
        id: String,
        actor: String,
        file: PathBuf,
        #[arg(long)]
        etag: String,
    },

    /// Re-run tag validation and computed tags for one item
    Recompute { dataset: String, id: String },

    /// Print one item
    Show { dataset: String, id: String },

    /// Print the per-dataset quotas for a batch size
    Quotas { limit: usize },

    /// Print the global tag list, or replace it when tags are given
    GlobalTags { tags: Vec<String> },

    /// Print dataset instructions, or replace them when text is given
    Instructions { dataset: String, text: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = TomlConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting gtc-curator v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!("Database path: {}", db_path.display());
    let pool = db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let sqlite = SqliteRepository::new(pool.clone());
    let repo: Arc<dyn Repository> = Arc::new(sqlite);

    let registry = ComputedTagRegistry::with_builtin_plugins(config.tags.plugin_failure)?;
    let pipeline = TagPipeline::new(TagValidator::new(config.tags.schema()), registry);
    let curator = Curator::new(repo.clone(), pipeline, config.buckets.count);
    let coordinator = AssignmentCoordinator::new(
        repo.clone(),
        config.allocation.weights.clone(),
        config.self_serve.policy(),
    );

    match args.command {
        Command::Import { dataset, file } => {
            let items: Vec<GroundTruthItem> = read_json(&file)?;
            print_json(&curator.import_items(&dataset, items).await?)
        }
        Command::SelfServe { user, limit } => {
            let limit = limit.unwrap_or(config.self_serve.default_limit);
            print_json(&coordinator.self_serve(&user, limit).await?)
        }
        Command::Assign {
            dataset,
            id,
            user,
            etag,
            allow_override,
        } => print_json(
            &coordinator
                .manual_assign(&dataset, &id, &user, &etag, allow_override)
                .await?,
        ),
        Command::Status {
            dataset,
            id,
            actor,
            status,
            etag,
            allow_override,
        } => print_json(
            &coordinator
                .transition_status(&dataset, &id, &actor, status, &etag, allow_override)
                .await?,
        ),
        Command::Release {
            dataset,
            id,
            user,
            etag,
        } => print_json(&coordinator.release(&dataset, &id, &user, &etag).await?),
        Command::Edit {
            dataset,
            id,
            actor,
            file,
            etag,
        } => {
            let edit: ItemEdit = read_json(&file)?;
            print_json(&curator.update_item(&dataset, &id, edit, &etag, &actor).await?)
        }
        Command::Recompute { dataset, id } => {
            print_json(&curator.recompute_tags(&dataset, &id).await?)
        }
        Command::Show { dataset, id } => match repo.get_item(&dataset, &id).await? {
            Some(item) => print_json(&item),
            None => bail!("Item not found: {}/{}", dataset, id),
        },
        Command::GlobalTags { tags } => {
            if tags.is_empty() {
                print_json(&db::get_global_tags(&pool).await?)
            } else {
                print_json(&db::set_global_tags(&pool, &tags).await?)
            }
        }
        Command::Instructions { dataset, text } => {
            if let Some(text) = text {
                db::set_dataset_instructions(&pool, &dataset, &text).await?;
            }
            print_json(&db::get_dataset_instructions(&pool, &dataset).await?)
        }
        Command::Quotas { limit } => {
            print_json(&compute_quotas(coordinator.weights(), limit))
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
