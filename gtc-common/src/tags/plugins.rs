//! Built-in computed tag plugins

use super::computed::{ComputedTagPlugin, ComputedTagRegistry};
use crate::models::GroundTruthItem;
use crate::Result;

/// Register the built-in plugins in their canonical order
pub fn register_builtin(registry: &mut ComputedTagRegistry) -> Result<()> {
    registry.register(Box::new(RetrievalBehaviorPlugin))?;
    registry.register(Box::new(TurnsPlugin))?;
    registry.register(Box::new(QuestionLengthPlugin::default()))?;
    registry.register(Box::new(DatasetPlugin))?;
    Ok(())
}

/// `retrieval_behavior:{no_retrieval,single,multi}` from the reference count
pub struct RetrievalBehaviorPlugin;

impl ComputedTagPlugin for RetrievalBehaviorPlugin {
    fn tag_key(&self) -> &str {
        "retrieval_behavior"
    }

    fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>> {
        let value = match item.references.len() {
            0 => "no_retrieval",
            1 => "single",
            _ => "multi",
        };
        Ok(Some(format!("retrieval_behavior:{}", value)))
    }
}

/// `turns:{single_turn,multi_turn}` from the conversation history
pub struct TurnsPlugin;

impl ComputedTagPlugin for TurnsPlugin {
    fn tag_key(&self) -> &str {
        "turns"
    }

    fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>> {
        let value = if item.history.is_empty() {
            "single_turn"
        } else {
            "multi_turn"
        };
        Ok(Some(format!("turns:{}", value)))
    }
}

/// `question_length:{short,medium,long}` by whitespace-separated word count
pub struct QuestionLengthPlugin {
    pub short_max_words: usize,
    pub medium_max_words: usize,
}

impl Default for QuestionLengthPlugin {
    fn default() -> Self {
        Self {
            short_max_words: 10,
            medium_max_words: 40,
        }
    }
}

impl ComputedTagPlugin for QuestionLengthPlugin {
    fn tag_key(&self) -> &str {
        "question_length"
    }

    fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>> {
        let words = item.question.split_whitespace().count();
        let value = match words {
            0 => return Ok(None),
            n if n <= self.short_max_words => "short",
            n if n <= self.medium_max_words => "medium",
            _ => "long",
        };
        Ok(Some(format!("question_length:{}", value)))
    }
}

/// `dataset:<name>`; the key is a placeholder resolved per item
pub struct DatasetPlugin;

impl ComputedTagPlugin for DatasetPlugin {
    fn tag_key(&self) -> &str {
        "dataset:*"
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn compute(&self, item: &GroundTruthItem) -> Result<Option<String>> {
        let name = item.dataset_name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("dataset:{}", name.replace(':', "-"))))
    }
}
