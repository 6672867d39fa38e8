//! Manual tag validation and normalization
//!
//! Normalization is trim, lowercase, dedupe, sort. Checks run in a fixed
//! order (format over every tag, then exclusivity, then dependencies, each by
//! ascending group name) and stop at the first violation.

use std::collections::{BTreeMap, BTreeSet};

use super::schema::TagSchema;
use crate::{Error, Result};

/// Normalize a single "group:value" tag
///
/// `"  Source : SME "` becomes `"source:sme"`.
pub fn normalize_tag(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let (group, value) = trimmed
        .split_once(':')
        .ok_or_else(|| Error::TagFormat(trimmed.to_string()))?;

    let group = group.trim().to_lowercase();
    let value = value.trim().to_lowercase();
    if group.is_empty() || value.is_empty() || value.contains(':') {
        return Err(Error::TagFormat(trimmed.to_string()));
    }

    Ok(format!("{}:{}", group, value))
}

/// Validates manual tag sets against a [`TagSchema`]
#[derive(Debug, Clone)]
pub struct TagValidator {
    schema: TagSchema,
}

impl TagValidator {
    pub fn new(schema: TagSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &TagSchema {
        &self.schema
    }

    /// Validate and return the normalized, sorted, deduplicated tag list
    pub fn validate<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        let normalized: BTreeSet<String> = tags
            .iter()
            .map(|t| normalize_tag(t.as_ref()))
            .collect::<Result<_>>()?;

        let mut by_group: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for tag in &normalized {
            // normalize_tag guarantees the separator
            if let Some((group, value)) = tag.split_once(':') {
                by_group.entry(group).or_default().push(value);
            }
        }

        for (group, values) in &by_group {
            if values.len() > 1 && self.schema.is_exclusive(group) {
                return Err(Error::TagExclusivity {
                    group: group.to_string(),
                    values: values.iter().map(|v| v.to_string()).collect(),
                });
            }
        }

        for group in by_group.keys() {
            if let Some(required) = self.schema.dependency_of(group) {
                if !by_group.contains_key(required) {
                    return Err(Error::TagDependency {
                        group: group.to_string(),
                        requires: required.to_string(),
                    });
                }
            }
        }

        Ok(normalized.into_iter().collect())
    }
}

impl Default for TagValidator {
    fn default() -> Self {
        Self::new(TagSchema::builtin())
    }
}

/// Validate against the built-in catalog
pub fn validate_tags<S: AsRef<str>>(tags: &[S]) -> Result<Vec<String>> {
    TagValidator::default().validate(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::schema::TagGroup;

    #[test]
    fn test_normalize_tag_trims_and_lowercases() {
        assert_eq!(normalize_tag("  Source : SME ").unwrap(), "source:sme");
        assert_eq!(normalize_tag("topic:general").unwrap(), "topic:general");
    }

    #[test]
    fn test_normalize_tag_rejects_malformed() {
        for bad in ["", "source", ":sme", "source:", "  : ", "a:b:c"] {
            match normalize_tag(bad) {
                Err(Error::TagFormat(_)) => {}
                other => panic!("expected format error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_exclusive_group_rejected() {
        match validate_tags(&["source:sme", "source:synthetic"]) {
            Err(Error::TagExclusivity { group, values }) => {
                assert_eq!(group, "source");
                assert_eq!(values, vec!["sme", "synthetic"]);
            }
            other => panic!("expected exclusivity error, got {:?}", other),
        }
    }

    #[test]
    fn test_exclusive_duplicates_collapse_first() {
        // Same value twice after normalization is a single value
        let tags = validate_tags(&["source:SME", " source:sme"]).unwrap();
        assert_eq!(tags, vec!["source:sme"]);
    }

    #[test]
    fn test_non_exclusive_group_accepts_many() {
        let tags = validate_tags(&["topic:simulation", "topic:general"]).unwrap();
        assert_eq!(tags, vec!["topic:general", "topic:simulation"]);
    }

    #[test]
    fn test_dependency_enforced() {
        match validate_tags(&["sme_domain:networking"]) {
            Err(Error::TagDependency { group, requires }) => {
                assert_eq!(group, "sme_domain");
                assert_eq!(requires, "source");
            }
            other => panic!("expected dependency error, got {:?}", other),
        }

        // Any value of the required group satisfies it, catalogued or not
        let tags = validate_tags(&["sme_domain:networking", "source:crowd"]).unwrap();
        assert_eq!(tags, vec!["sme_domain:networking", "source:crowd"]);
    }

    #[test]
    fn test_unknown_groups_accepted() {
        let tags = validate_tags(&["Team:Alpha", "zeta:one"]).unwrap();
        assert_eq!(tags, vec!["team:alpha", "zeta:one"]);
    }

    #[test]
    fn test_format_error_wins_over_schema_errors() {
        let result = validate_tags(&["source:sme", "source:synthetic", "broken"]);
        assert!(matches!(result, Err(Error::TagFormat(tag)) if tag == "broken"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let once = validate_tags(&[" Topic:General", "difficulty : HARD", "topic:general"]).unwrap();
        let twice = validate_tags(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, vec!["difficulty:hard", "topic:general"]);
    }

    #[test]
    fn test_custom_schema_rules() {
        let schema = TagSchema::new([
            TagGroup::new("priority", &[]).exclusive(),
            TagGroup::new("escalation", &[]).depends_on("priority"),
        ]);
        let validator = TagValidator::new(schema);

        assert!(validator.validate(&["priority:p1", "priority:p2"]).is_err());
        assert!(validator.validate(&["escalation:yes"]).is_err());
        // Built-in rules do not leak into a custom schema
        assert!(validator.validate(&["source:sme", "source:synthetic"]).is_ok());
    }
}
