//! LoRA stack normalisation
//!
//! Turns the raw per-slot widget values of a loader node into the ordered
//! list of LoRAs to apply. Slots are read in ascending order; unset slots and
//! slots whose strength is effectively zero are dropped, then repeated names
//! are dropped after their first occurrence. Malformed slot data never raises,
//! it just counts as "not set".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Selector value meaning "no LoRA in this slot"
pub const NONE_SENTINEL: &str = "None";

/// Hard upper bound on slots per node
pub const MAX_SLOTS: usize = 10;

/// Strengths with a smaller magnitude are treated as disabled
pub const ZERO_THRESHOLD: f64 = 1e-5;

/// Strength used when a slot has a name but no strength value
pub const DEFAULT_STRENGTH: f64 = 1.0;

/// A single widget value as delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl InputValue {
    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value, if this is an integral number
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Widget values of one node invocation, by input name
pub type NodeInputs = BTreeMap<String, InputValue>;

/// How slot strengths are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// One strength per slot (`lora_wt_i`)
    #[default]
    Simple,
    /// Separate model and text-encoder strengths (`model_str_i`, `clip_str_i`)
    Advanced,
}

impl InputMode {
    /// Parse a mode name; anything other than "advanced" is simple
    pub fn from_name(name: &str) -> Self {
        match name {
            "advanced" => Self::Advanced,
            _ => Self::Simple,
        }
    }

    /// Mode name as shown in the UI
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Advanced => "advanced",
        }
    }
}

/// Input names of slot `i` (1-based)
pub fn lora_name_key(i: usize) -> String {
    format!("lora_name_{i}")
}

/// Simple-mode strength input of slot `i`
pub fn lora_weight_key(i: usize) -> String {
    format!("lora_wt_{i}")
}

/// Advanced-mode model strength input of slot `i`
pub fn model_strength_key(i: usize) -> String {
    format!("model_str_{i}")
}

/// Advanced-mode text-encoder strength input of slot `i`
pub fn clip_strength_key(i: usize) -> String {
    format!("clip_str_{i}")
}

/// Normalisation limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Slots beyond this count are ignored
    pub max_slots: usize,
    /// Strengths with a smaller magnitude are dropped
    pub zero_threshold: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_slots: MAX_SLOTS,
            zero_threshold: ZERO_THRESHOLD,
        }
    }
}

/// A slot that passed filtering
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedSlot {
    /// Slot number (1-based)
    pub index: usize,
    /// Selected LoRA name
    pub name: String,
    /// Strength fed to the model
    pub strength: f64,
    /// Text-encoder strength (advanced mode only, not applied)
    pub clip_strength: Option<f64>,
}

/// Read and filter slots `1..=slot_count`, without deduplication
pub fn collect_slots(
    inputs: &NodeInputs,
    slot_count: usize,
    mode: InputMode,
    config: &NormalizeConfig,
) -> Vec<AcceptedSlot> {
    let last = slot_count.min(config.max_slots).min(MAX_SLOTS);
    let mut accepted = Vec::new();

    for index in 1..=last {
        let Some(name) = inputs
            .get(&lora_name_key(index))
            .and_then(InputValue::as_str)
            .filter(|n| !n.is_empty() && *n != NONE_SENTINEL)
        else {
            continue;
        };

        let strength_key = match mode {
            InputMode::Simple => lora_weight_key(index),
            InputMode::Advanced => model_strength_key(index),
        };
        let strength = match inputs.get(&strength_key) {
            None => DEFAULT_STRENGTH,
            Some(value) => match value.as_f64() {
                Some(s) if s.is_finite() => s,
                _ => {
                    debug!(slot = index, key = %strength_key, "Ignoring slot with malformed strength");
                    continue;
                }
            },
        };

        if strength.abs() < config.zero_threshold {
            debug!(slot = index, name, strength, "Skipping slot with zero strength");
            continue;
        }

        let clip_strength = match mode {
            InputMode::Simple => None,
            InputMode::Advanced => inputs
                .get(&clip_strength_key(index))
                .and_then(InputValue::as_f64),
        };

        accepted.push(AcceptedSlot {
            index,
            name: name.to_string(),
            strength,
            clip_strength,
        });
    }

    accepted
}

/// One entry of a normalised stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    /// LoRA name as selected in the UI
    pub name: String,
    /// Model strength
    pub strength: f64,
}

/// Ordered, deduplicated list of LoRAs to apply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoraStack {
    entries: Vec<StackEntry>,
}

impl LoraStack {
    /// Create an empty stack
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalise the slot inputs of one node invocation
    pub fn from_inputs(
        inputs: &NodeInputs,
        slot_count: usize,
        mode: InputMode,
        config: &NormalizeConfig,
    ) -> Self {
        Self::dedupe(collect_slots(inputs, slot_count, mode, config))
    }

    /// Build a stack from accepted slots, keeping the first of each name
    pub fn dedupe(slots: impl IntoIterator<Item = AcceptedSlot>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for slot in slots {
            if seen.insert(slot.name.clone()) {
                entries.push(StackEntry {
                    name: slot.name,
                    strength: slot.strength,
                });
            } else {
                debug!(slot = slot.index, name = %slot.name, "Dropping duplicate LoRA");
            }
        }

        Self { entries }
    }

    /// Build a stack from `(name, strength)` pairs, filtering and deduplicating
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, f64)>,
        config: &NormalizeConfig,
    ) -> Self {
        let slots = pairs
            .into_iter()
            .enumerate()
            .take(config.max_slots.min(MAX_SLOTS))
            .filter(|(_, (name, strength))| {
                !name.is_empty() && *name != NONE_SENTINEL && strength.abs() >= config.zero_threshold
            })
            .map(|(i, (name, strength))| AcceptedSlot {
                index: i + 1,
                name: name.to_string(),
                strength,
                clip_strength: None,
            });
        Self::dedupe(slots)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over entries in application order
    pub fn iter(&self) -> impl Iterator<Item = &StackEntry> {
        self.entries.iter()
    }

    /// Entries as a slice
    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    /// Names in application order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a LoraStack {
    type Item = &'a StackEntry;
    type IntoIter = std::slice::Iter<'a, StackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(values: &[(&str, InputValue)]) -> NodeInputs {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn simple(values: &[(&str, InputValue)], slots: usize) -> LoraStack {
        LoraStack::from_inputs(
            &inputs(values),
            slots,
            InputMode::Simple,
            &NormalizeConfig::default(),
        )
    }

    fn pairs(stack: &LoraStack) -> Vec<(&str, f64)> {
        stack.iter().map(|e| (e.name.as_str(), e.strength)).collect()
    }

    #[test]
    fn test_drops_zero_and_sentinel() {
        let stack = simple(
            &[
                ("lora_name_1", "a.safetensors".into()),
                ("lora_wt_1", 1.0.into()),
                ("lora_name_2", "b.safetensors".into()),
                ("lora_wt_2", 0.0.into()),
                ("lora_name_3", "None".into()),
                ("lora_wt_3", 5.0.into()),
            ],
            3,
        );

        assert_eq!(pairs(&stack), vec![("a.safetensors", 1.0)]);
    }

    #[test]
    fn test_first_duplicate_wins() {
        let stack = simple(
            &[
                ("lora_name_1", "x".into()),
                ("lora_wt_1", 0.8.into()),
                ("lora_name_2", "x".into()),
                ("lora_wt_2", 0.3.into()),
            ],
            2,
        );

        assert_eq!(pairs(&stack), vec![("x", 0.8)]);
    }

    #[test]
    fn test_zero_threshold_boundary() {
        let stack = simple(
            &[
                ("lora_name_1", "kept".into()),
                ("lora_wt_1", 1e-5.into()),
                ("lora_name_2", "dropped".into()),
                ("lora_wt_2", 9.999e-6.into()),
                ("lora_name_3", "negative".into()),
                ("lora_wt_3", (-1e-5).into()),
            ],
            3,
        );

        assert_eq!(stack.names(), vec!["kept", "negative"]);
    }

    #[test]
    fn test_strength_just_below_threshold_is_dropped() {
        // Rounds to 1e-5 in single precision
        let stack = simple(
            &[
                ("lora_name_1", "tiny".into()),
                ("lora_wt_1", 9.9999999e-6.into()),
                ("lora_name_2", "exact".into()),
                ("lora_wt_2", 0.8.into()),
            ],
            2,
        );

        assert_eq!(pairs(&stack), vec![("exact", 0.8)]);
    }

    #[test]
    fn test_slot_count_limits_scan() {
        let stack = simple(
            &[
                ("lora_name_1", "a".into()),
                ("lora_name_2", "b".into()),
                ("lora_name_3", "c".into()),
            ],
            2,
        );

        assert_eq!(stack.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_never_scans_past_max_slots() {
        let stack = simple(
            &[("lora_name_10", "ten".into()), ("lora_name_11", "eleven".into())],
            50,
        );

        assert_eq!(stack.names(), vec!["ten"]);
    }

    #[test]
    fn test_missing_strength_defaults_to_one() {
        let stack = simple(&[("lora_name_1", "a".into())], 1);
        assert_eq!(pairs(&stack), vec![("a", 1.0)]);
    }

    #[test]
    fn test_malformed_slot_is_unset() {
        let stack = simple(
            &[
                ("lora_name_1", InputValue::Int(3)),
                ("lora_name_2", "b".into()),
                ("lora_wt_2", "heavy".into()),
                ("lora_name_3", "".into()),
                ("lora_name_4", "d".into()),
                ("lora_wt_4", InputValue::Float(f64::NAN)),
            ],
            4,
        );

        assert!(stack.is_empty());
    }

    #[test]
    fn test_advanced_mode_uses_model_strength() {
        let values = inputs(&[
            ("lora_name_1", "a".into()),
            ("lora_wt_1", 0.1.into()),
            ("model_str_1", 0.7.into()),
            ("clip_str_1", 0.2.into()),
            ("lora_name_2", "b".into()),
            ("model_str_2", 0.0.into()),
            ("clip_str_2", 1.0.into()),
        ]);

        let config = NormalizeConfig::default();
        let slots = collect_slots(&values, 2, InputMode::Advanced, &config);

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].strength, 0.7);
        assert_eq!(slots[0].clip_strength, Some(0.2));

        let stack = LoraStack::dedupe(slots);
        assert_eq!(pairs(&stack), vec![("a", 0.7)]);
    }

    #[test]
    fn test_negative_strength_kept() {
        let stack = simple(
            &[("lora_name_1", "a".into()), ("lora_wt_1", (-0.5).into())],
            1,
        );
        assert_eq!(pairs(&stack), vec![("a", -0.5)]);
    }

    #[test]
    fn test_from_pairs() {
        let stack = LoraStack::from_pairs(
            [("a", 1.0), ("b", 0.0), ("None", 5.0), ("a", 0.2), ("c", 0.5)],
            &NormalizeConfig::default(),
        );
        assert_eq!(pairs(&stack), vec![("a", 1.0), ("c", 0.5)]);
    }

    #[test]
    fn test_input_mode_names() {
        assert_eq!(InputMode::from_name("advanced"), InputMode::Advanced);
        assert_eq!(InputMode::from_name("simple"), InputMode::Simple);
        assert_eq!(InputMode::from_name("other"), InputMode::Simple);
        assert_eq!(InputMode::Advanced.name(), "advanced");
    }

    #[test]
    fn test_input_value_json() {
        let values: NodeInputs =
            serde_json::from_str(r#"{"lora_name_1": "a", "lora_wt_1": 0.5, "lora_count": 3}"#)
                .unwrap();

        assert_eq!(values["lora_name_1"].as_str(), Some("a"));
        assert_eq!(values["lora_wt_1"].as_f64(), Some(0.5));
        assert_eq!(values["lora_count"].as_i64(), Some(3));
    }
}
