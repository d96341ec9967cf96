//! Weighted prompts and the active subset
//!
//! The caller supplies a full mapping of prompts steering generation; the
//! core re-evaluates the *active subset* on every mutation. A prompt is
//! active when its weight is non-zero and its text has not been rejected by
//! the service. The service's rejections accumulate in a
//! [`FilteredPromptSet`] that only ever grows for the life of a session.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Full prompt mapping keyed by prompt id
///
/// BTreeMap keeps iteration (and therefore outbound update payloads)
/// deterministic.
pub type PromptMap = BTreeMap<String, WeightedPrompt>;

/// One text prompt with its generation weight
///
/// `cc` and `color` are carried for the caller's benefit (controller mapping
/// and display); the core treats them as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedPrompt {
    /// Stable identity assigned by the caller
    pub prompt_id: String,
    /// Prompt text sent to the generation service
    pub text: String,
    /// Generation weight; exactly 0 removes the prompt from the active set
    pub weight: f64,
    /// MIDI CC number the caller mapped to this prompt (opaque here)
    pub cc: u8,
    /// Display color (opaque here)
    pub color: String,
}

impl WeightedPrompt {
    /// Create a prompt with default cc/color
    pub fn new(prompt_id: impl Into<String>, text: impl Into<String>, weight: f64) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            text: text.into(),
            weight,
            cc: 0,
            color: String::new(),
        }
    }

    /// Set the mapped CC number
    pub fn with_cc(mut self, cc: u8) -> Self {
        self.cc = cc;
        self
    }

    /// Set the display color
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Prompt texts the service has rejected
///
/// Grows monotonically: entries are never removed, only a fresh session
/// starts with an empty set. Consulted when computing the active subset.
#[derive(Debug, Clone, Default)]
pub struct FilteredPromptSet {
    texts: BTreeSet<String>,
}

impl FilteredPromptSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected text; returns true if it was not already present
    pub fn insert(&mut self, text: impl Into<String>) -> bool {
        self.texts.insert(text.into())
    }

    /// Whether a text has been rejected
    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text)
    }

    /// Number of rejected texts
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// True when nothing has been rejected yet
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Iterate rejected texts in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }
}

/// Prompts currently eligible to influence generation
///
/// Excludes zero-weighted prompts and any whose text is in the filtered set.
/// Returned in prompt-id order.
pub fn active_prompts(prompts: &PromptMap, filtered: &FilteredPromptSet) -> Vec<WeightedPrompt> {
    prompts
        .values()
        .filter(|p| p.weight != 0.0 && !filtered.contains(&p.text))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_map(entries: &[(&str, &str, f64)]) -> PromptMap {
        entries
            .iter()
            .map(|(id, text, weight)| {
                (id.to_string(), WeightedPrompt::new(*id, *text, *weight))
            })
            .collect()
    }

    #[test]
    fn test_active_excludes_zero_weight() {
        let prompts = prompt_map(&[("p1", "piano", 1.0), ("p2", "drums", 0.0)]);
        let filtered = FilteredPromptSet::new();

        let active = active_prompts(&prompts, &filtered);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].prompt_id, "p1");
    }

    #[test]
    fn test_active_excludes_filtered_text() {
        let prompts = prompt_map(&[("p1", "piano", 1.0), ("p2", "drums", 0.5)]);
        let mut filtered = FilteredPromptSet::new();
        filtered.insert("drums");

        let active = active_prompts(&prompts, &filtered);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "piano");
    }

    #[test]
    fn test_negative_weight_is_active() {
        // Only exactly-zero weights are excluded
        let prompts = prompt_map(&[("p1", "piano", -0.5)]);
        let filtered = FilteredPromptSet::new();

        assert_eq!(active_prompts(&prompts, &filtered).len(), 1);
    }

    #[test]
    fn test_active_empty_when_everything_excluded() {
        let prompts = prompt_map(&[("p1", "piano", 0.0), ("p2", "drums", 1.0)]);
        let mut filtered = FilteredPromptSet::new();
        filtered.insert("drums");

        assert!(active_prompts(&prompts, &filtered).is_empty());
    }

    #[test]
    fn test_active_order_is_deterministic() {
        let prompts = prompt_map(&[("b", "bass", 1.0), ("a", "airy pads", 1.0), ("c", "cello", 1.0)]);
        let filtered = FilteredPromptSet::new();

        let ids: Vec<_> = active_prompts(&prompts, &filtered)
            .into_iter()
            .map(|p| p.prompt_id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_filtered_set_is_monotonic() {
        let mut filtered = FilteredPromptSet::new();
        assert!(filtered.is_empty());

        assert!(filtered.insert("loud noise"));
        assert!(!filtered.insert("loud noise"));

        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains("loud noise"));
        assert!(!filtered.contains("piano"));
    }

    #[test]
    fn test_prompt_builder() {
        let p = WeightedPrompt::new("p1", "warm keys", 1.2)
            .with_cc(21)
            .with_color("#9900ff");

        assert_eq!(p.cc, 21);
        assert_eq!(p.color, "#9900ff");
        assert_eq!(p.weight, 1.2);
    }

    #[test]
    fn test_prompt_serializes_camel_case() {
        let p = WeightedPrompt::new("p1", "piano", 1.0).with_cc(3);
        let value = serde_json::to_value(&p).unwrap();

        assert_eq!(value["promptId"], "p1");
        assert_eq!(value["cc"], 3);
        assert!(value.get("prompt_id").is_none());
    }
}
