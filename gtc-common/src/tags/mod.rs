//! Tag schema, manual tag validation and computed tags

pub mod computed;
pub mod plugins;
pub mod schema;
pub mod validation;

pub use computed::{ComputedTagPlugin, ComputedTagRegistry, PluginFailurePolicy};
pub use schema::{TagGroup, TagSchema};
pub use validation::{normalize_tag, validate_tags, TagValidator};

use crate::models::GroundTruthItem;
use crate::Result;
use tracing::warn;

/// Validation plus computed-tag derivation, applied on every persist path
pub struct TagPipeline {
    validator: TagValidator,
    registry: ComputedTagRegistry,
}

impl TagPipeline {
    pub fn new(validator: TagValidator, registry: ComputedTagRegistry) -> Self {
        Self { validator, registry }
    }

    pub fn validator(&self) -> &TagValidator {
        &self.validator
    }

    pub fn registry(&self) -> &ComputedTagRegistry {
        &self.registry
    }

    /// Normalize manual tags and overwrite computed tags in place.
    ///
    /// Returns the number of manual tags outside the catalog (advisory only).
    pub fn apply(&self, item: &mut GroundTruthItem) -> Result<usize> {
        let manual = self.validator.validate(&item.manual_tags)?;

        let unknown = self.validator.schema().unknown_tags(&manual);
        if !unknown.is_empty() {
            warn!(item = %item.key(), "Tags outside catalog: {:?}", unknown);
        }
        let unknown_count = unknown.len();

        item.manual_tags = manual;
        item.computed_tags = self.registry.compute_all(item)?;
        Ok(unknown_count)
    }
}
