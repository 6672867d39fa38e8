//! # Ground Truth Curator Common Library
//!
//! Curation core shared by the curator binary:
//! - Item model and status lifecycle
//! - Tag schema validation and computed tag plugins
//! - Dataset quota allocation and bucket assignment
//! - Self-serve and manual assignment under optimistic concurrency
//! - Repository contract with in-memory and SQLite backends
//! - Configuration loading

pub mod allocation;
pub mod assignment;
pub mod buckets;
pub mod config;
pub mod curation;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod tags;

pub use assignment::{AssignmentCoordinator, SelfServePolicy, SelfServeResult};
pub use curation::{Curator, ImportSummary, ItemEdit};
pub use error::{Error, Result};
pub use models::{GroundTruthItem, ItemStatus};
pub use repository::{InMemoryRepository, Repository};
pub use tags::TagPipeline;
