//! Tag group catalog
//!
//! Allowed values are advisory: they drive UI suggestions and warnings, never
//! rejection. Exclusivity and dependency rules apply structurally to any tag
//! whose group name matches, catalogued value or not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tag group definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroup {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub mutually_exclusive: bool,
    #[serde(default)]
    pub depends_on: Option<String>,
}

impl TagGroup {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            mutually_exclusive: false,
            depends_on: None,
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.mutually_exclusive = true;
        self
    }

    pub fn depends_on(mut self, group: &str) -> Self {
        self.depends_on = Some(group.to_string());
        self
    }
}

/// Static catalog of tag groups keyed by normalized group name
#[derive(Debug, Clone, Default)]
pub struct TagSchema {
    groups: BTreeMap<String, TagGroup>,
}

impl TagSchema {
    /// Build a schema; group names and values are lowercased and trimmed
    pub fn new(groups: impl IntoIterator<Item = TagGroup>) -> Self {
        let groups = groups
            .into_iter()
            .map(|mut g| {
                g.name = g.name.trim().to_lowercase();
                g.values = g.values.iter().map(|v| v.trim().to_lowercase()).collect();
                g.depends_on = g.depends_on.map(|d| d.trim().to_lowercase());
                (g.name.clone(), g)
            })
            .collect();
        Self { groups }
    }

    /// Catalog shipped with the curator
    pub fn builtin() -> Self {
        Self::new([
            TagGroup::new("source", &["sme", "synthetic", "user", "production"]).exclusive(),
            TagGroup::new("difficulty", &["easy", "medium", "hard"]).exclusive(),
            TagGroup::new("split", &["train", "validation", "test"]).exclusive(),
            TagGroup::new(
                "topic",
                &["general", "simulation", "troubleshooting", "configuration"],
            ),
            TagGroup::new("answer_type", &["factual", "procedural", "opinion", "refusal"]),
            TagGroup::new("sme_domain", &[]).depends_on("source"),
        ])
    }

    pub fn group(&self, name: &str) -> Option<&TagGroup> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TagGroup> {
        self.groups.values()
    }

    pub fn is_exclusive(&self, group: &str) -> bool {
        self.group(group).map(|g| g.mutually_exclusive).unwrap_or(false)
    }

    pub fn dependency_of(&self, group: &str) -> Option<&str> {
        self.group(group).and_then(|g| g.depends_on.as_deref())
    }

    /// Normalized tags whose group is uncatalogued, or whose value is not in
    /// a non-empty value list
    pub fn unknown_tags<'a>(&self, normalized: &'a [String]) -> Vec<&'a str> {
        normalized
            .iter()
            .filter(|tag| match tag.split_once(':') {
                Some((group, value)) => match self.group(group) {
                    Some(g) => !g.values.is_empty() && !g.values.iter().any(|v| v == value),
                    None => true,
                },
                None => true,
            })
            .map(|tag| tag.as_str())
            .collect()
    }
}
