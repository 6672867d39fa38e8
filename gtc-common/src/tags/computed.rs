//! Computed tag plugins
//!
//! Plugins are pure functions of an item: no I/O and no hidden state, so
//! recomputing an unchanged item always yields the same tags. The registry is
//! populated by explicit `register()` calls and evaluated in registration
//! order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use super::validation::normalize_tag;
use crate::models::GroundTruthItem;
use crate::{Error, Result};

/// Computed tag plugin trait - every derived tag source implements this
pub trait ComputedTagPlugin: Send + Sync {
    /// Tag key produced by this plugin (e.g. "turns").
    ///
    /// For dynamic plugins this is a placeholder such as "dataset:*"; the
    /// concrete tag is resolved per item.
    fn tag_key(&self) -> &str;

    /// Dynamic plugins are exempt from duplicate-key checks
    fn is_dynamic(&self) -> bool {
        false
    }

    /// Derive a "group:value" tag from the item, or `None` when not applicable
    fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>>;
}

/// What to do when a plugin returns an error or a malformed tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginFailurePolicy {
    /// Abort tag computation for the item
    #[default]
    FailFast,
    /// Log, drop that plugin's output, continue with the rest
    SkipFaulty,
}

/// Ordered registry of computed tag plugins
#[derive(Default)]
pub struct ComputedTagRegistry {
    plugins: Vec<Box<dyn ComputedTagPlugin>>,
    static_keys: HashSet<String>,
    policy: PluginFailurePolicy,
}

impl ComputedTagRegistry {
    pub fn new(policy: PluginFailurePolicy) -> Self {
        Self {
            plugins: Vec::new(),
            static_keys: HashSet::new(),
            policy,
        }
    }

    /// Registry with the built-in plugins registered in a fixed order
    pub fn with_builtin_plugins(policy: PluginFailurePolicy) -> Result<Self> {
        let mut registry = Self::new(policy);
        super::plugins::register_builtin(&mut registry)?;
        Ok(registry)
    }

    pub fn policy(&self) -> PluginFailurePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered keys in registration order
    pub fn tag_keys(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.tag_key()).collect()
    }

    /// Register a plugin; a second static plugin with the same key is rejected
    pub fn register(&mut self, plugin: Box<dyn ComputedTagPlugin>) -> Result<()> {
        let key = plugin.tag_key().to_string();
        if !plugin.is_dynamic() && !self.static_keys.insert(key.clone()) {
            return Err(Error::DuplicatePluginKey(key));
        }
        debug!(tag_key = %key, dynamic = plugin.is_dynamic(), "Registered computed tag plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Sorted, deduplicated union of every plugin's output
    pub fn compute_all(&self, item: &GroundTruthItem) -> Result<Vec<String>> {
        let mut tags = BTreeSet::new();

        for plugin in &self.plugins {
            let outcome = plugin
                .compute(item)
                .and_then(|tag| tag.map(|t| normalize_tag(&t)).transpose());

            match outcome {
                Ok(Some(tag)) => {
                    tags.insert(tag);
                }
                Ok(None) => {}
                Err(e) => {
                    let err = match e {
                        Error::Plugin { .. } => e,
                        other => Error::Plugin {
                            tag_key: plugin.tag_key().to_string(),
                            message: other.to_string(),
                        },
                    };
                    match self.policy {
                        PluginFailurePolicy::FailFast => return Err(err),
                        PluginFailurePolicy::SkipFaulty => {
                            warn!(item = %item.key(), "Skipping faulty plugin: {}", err);
                        }
                    }
                }
            }
        }

        Ok(tags.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Option<&'static str>);

    impl ComputedTagPlugin for Fixed {
        fn tag_key(&self) -> &str {
            self.0
        }

        fn compute(&self, _item: &GroundTruthItem) -> Result<Option<String>> {
            Ok(self.1.map(|s| s.to_string()))
        }
    }

    struct Faulty;

    impl ComputedTagPlugin for Faulty {
        fn tag_key(&self) -> &str {
            "faulty"
        }

        fn compute(&self, _item: &GroundTruthItem) -> Result<Option<String>> {
            Err(Error::Internal("boom".to_string()))
        }
    }

    struct Dynamic;

    impl ComputedTagPlugin for Dynamic {
        fn tag_key(&self) -> &str {
            "dataset:*"
        }

        fn is_dynamic(&self) -> bool {
            true
        }

        fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>> {
            Ok(Some(format!("dataset:{}", item.dataset_name)))
        }
    }

    #[test]
    fn test_duplicate_static_key_rejected() {
        let mut registry = ComputedTagRegistry::default();
        registry.register(Box::new(Fixed("turns", None))).unwrap();
        let err = registry.register(Box::new(Fixed("turns", None))).unwrap_err();
        assert!(matches!(err, Error::DuplicatePluginKey(key) if key == "turns"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dynamic_keys_may_repeat() {
        let mut registry = ComputedTagRegistry::default();
        registry.register(Box::new(Dynamic)).unwrap();
        registry.register(Box::new(Dynamic)).unwrap();
        assert_eq!(registry.tag_keys(), vec!["dataset:*", "dataset:*"]);

        let tags = registry.compute_all(&GroundTruthItem::new("Eval", "q1")).unwrap();
        assert_eq!(tags, vec!["dataset:eval"]);
    }

    #[test]
    fn test_compute_all_sorted_and_normalized() {
        let mut registry = ComputedTagRegistry::default();
        registry.register(Box::new(Fixed("b", Some("B : Two")))).unwrap();
        registry.register(Box::new(Fixed("a", Some("a:one")))).unwrap();
        registry.register(Box::new(Fixed("c", None))).unwrap();

        let tags = registry.compute_all(&GroundTruthItem::new("ds", "q1")).unwrap();
        assert_eq!(tags, vec!["a:one", "b:two"]);
    }

    #[test]
    fn test_fail_fast_propagates_fault() {
        let mut registry = ComputedTagRegistry::new(PluginFailurePolicy::FailFast);
        registry.register(Box::new(Fixed("a", Some("a:one")))).unwrap();
        registry.register(Box::new(Faulty)).unwrap();

        let err = registry.compute_all(&GroundTruthItem::new("ds", "q1")).unwrap_err();
        assert!(matches!(err, Error::Plugin { tag_key, .. } if tag_key == "faulty"));
    }

    #[test]
    fn test_malformed_output_is_a_fault() {
        let mut registry = ComputedTagRegistry::new(PluginFailurePolicy::FailFast);
        registry.register(Box::new(Fixed("bad", Some("no-separator")))).unwrap();
        assert!(registry.compute_all(&GroundTruthItem::new("ds", "q1")).is_err());
    }

    #[test]
    fn test_skip_faulty_continues() {
        let mut registry = ComputedTagRegistry::new(PluginFailurePolicy::SkipFaulty);
        registry.register(Box::new(Faulty)).unwrap();
        registry.register(Box::new(Fixed("a", Some("a:one")))).unwrap();

        let tags = registry.compute_all(&GroundTruthItem::new("ds", "q1")).unwrap();
        assert_eq!(tags, vec!["a:one"]);
    }
}
