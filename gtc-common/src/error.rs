//! Common error types for the curation core

use thiserror::Error;

/// Common result type for curation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the tag engine, allocation, assignment and storage layers
#[derive(Error, Debug)]
pub enum Error {
    /// Tag is not of the form "group:value" after trimming
    #[error("Invalid tag format: '{0}' (expected 'group:value')")]
    TagFormat(String),

    /// Two or more values present for a mutually exclusive group
    #[error("Tag group '{group}' is mutually exclusive but has multiple values: {values:?}")]
    TagExclusivity { group: String, values: Vec<String> },

    /// Dependent group present without the group it requires
    #[error("Tag group '{group}' requires a tag from group '{requires}'")]
    TagDependency { group: String, requires: String },

    /// A non-dynamic computed-tag plugin reused an already registered key
    #[error("Computed tag plugin already registered for key '{0}'")]
    DuplicatePluginKey(String),

    /// A computed-tag plugin failed while evaluating an item
    #[error("Computed tag plugin '{tag_key}' failed: {message}")]
    Plugin { tag_key: String, message: String },

    /// Presented etag does not match the stored one
    #[error("Concurrency conflict on {0}: etag is stale")]
    ConcurrencyConflict(String),

    /// Item is already assigned to someone else
    #[error("Assignment conflict on {item}: already assigned to '{owner}'")]
    AssignmentConflict { item: String, owner: String },

    /// Status change not permitted by the item state machine
    #[error("Invalid status transition on {item}: {from} -> {to}")]
    InvalidTransition { item: String, from: String, to: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend fault (wraps sqlx::Error); never retried by the core
    #[cfg(feature = "sqlx")]
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for schema and syntax violations of a manual tag set
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::TagFormat(_) | Error::TagExclusivity { .. } | Error::TagDependency { .. }
        )
    }

    /// True for optimistic-concurrency and ownership races
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ConcurrencyConflict(_) | Error::AssignmentConflict { .. }
        )
    }
}
