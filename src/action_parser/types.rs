use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single argument value of a parsed action.
///
/// Box arguments stay JSON-encoded strings (`"[0.1,0.2,0.1,0.2]"`); only the
/// derived absolute midpoints are numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionInput {
    Text(String),
    Coords(Vec<f64>),
}

impl ActionInput {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ActionInput::Text(s) => Some(s),
            ActionInput::Coords(_) => None,
        }
    }

    pub fn as_coords(&self) -> Option<&[f64]> {
        match self {
            ActionInput::Coords(c) => Some(c),
            ActionInput::Text(_) => None,
        }
    }
}

pub type ActionInputs = BTreeMap<String, ActionInput>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub reflection: Option<String>,
    pub thought: String,
    pub action_type: String,
    pub action_inputs: ActionInputs,
}

impl ParsedAction {
    /// Literal string argument, e.g. `content` of a `type(...)` action.
    pub fn input(&self, key: &str) -> Option<&str> {
        self.action_inputs.get(key).and_then(ActionInput::as_str)
    }

    /// Normalized `[x1, y1, x2, y2]` box stored under `key`.
    pub fn normalized_box(&self, key: &str) -> Option<[f64; 4]> {
        let raw = self.input(key)?;
        let values: Vec<Option<f64>> = serde_json::from_str(raw).ok()?;
        match values.as_slice() {
            [Some(x1), Some(y1), Some(x2), Some(y2)] => Some([*x1, *y1, *x2, *y2]),
            _ => None,
        }
    }

    pub fn start_coords(&self) -> Option<(f64, f64)> {
        self.coords("start_coords")
    }

    pub fn end_coords(&self) -> Option<(f64, f64)> {
        self.coords("end_coords")
    }

    fn coords(&self, key: &str) -> Option<(f64, f64)> {
        match self.action_inputs.get(key)?.as_coords()? {
            [x, y] => Some((*x, *y)),
            _ => None,
        }
    }
}

/// Output dialect the model was prompted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// `Thought: ... Action: ...` blocks.
    #[default]
    Bc,
    /// `<Thought>...</Thought>` tags closed by `</Output>`.
    O1,
}

/// Model-native coordinate range per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Factors {
    pub width: f64,
    pub height: f64,
}

impl Factors {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Divisor for the n-th number of a flattened `x, y, x, y` list.
    pub fn axis(&self, index: usize) -> f64 {
        if index % 2 == 0 {
            self.width
        } else {
            self.height
        }
    }
}

impl Default for Factors {
    fn default() -> Self {
        Self::new(1000.0, 1000.0)
    }
}

impl From<[f64; 2]> for Factors {
    fn from([width, height]: [f64; 2]) -> Self {
        Self { width, height }
    }
}

impl From<Factors> for [f64; 2] {
    fn from(f: Factors) -> Self {
        [f.width, f.height]
    }
}

/// Model generation. Selects the image pixel budget and whether
/// coordinates are normalized against the smart-resize grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UiTarsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[default]
    #[serde(rename = "1.5")]
    V1_5,
    #[serde(rename = "doubao-1.5-ui-tars-15")]
    Doubao15,
}

impl UiTarsVersion {
    pub fn max_pixels(self) -> u64 {
        match self {
            UiTarsVersion::V1_0 => 1350 * 28 * 28,
            UiTarsVersion::V1_5 => 16384 * 28 * 28,
            UiTarsVersion::Doubao15 => 5120 * 28 * 28,
        }
    }

    pub fn uses_smart_resize(self) -> bool {
        matches!(self, UiTarsVersion::Doubao15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factors_serde_as_pair() {
        let f: Factors = serde_json::from_str("[1366, 768]").unwrap();
        assert_eq!(f, Factors::new(1366.0, 768.0));
        assert_eq!(serde_json::to_string(&f).unwrap(), "[1366.0,768.0]");
        assert_eq!(f.axis(0), 1366.0);
        assert_eq!(f.axis(3), 768.0);
    }

    #[test]
    fn test_version_names() {
        let v: UiTarsVersion = serde_json::from_str("\"doubao-1.5-ui-tars-15\"").unwrap();
        assert!(v.uses_smart_resize());
        assert!(!UiTarsVersion::V1_5.uses_smart_resize());
        assert_eq!(UiTarsVersion::default(), UiTarsVersion::V1_5);
    }

    #[test]
    fn test_parsed_action_accessors() {
        let mut inputs = ActionInputs::new();
        inputs.insert("start_box".into(), ActionInput::Text("[0.1,0.2,0.3,0.4]".into()));
        inputs.insert("start_coords".into(), ActionInput::Coords(vec![384.0, 324.0]));
        inputs.insert("end_coords".into(), ActionInput::Coords(vec![]));
        let action = ParsedAction {
            reflection: None,
            thought: String::new(),
            action_type: "click".into(),
            action_inputs: inputs,
        };
        assert_eq!(action.normalized_box("start_box"), Some([0.1, 0.2, 0.3, 0.4]));
        assert_eq!(action.start_coords(), Some((384.0, 324.0)));
        assert_eq!(action.end_coords(), None);
        assert_eq!(action.input("missing"), None);
    }

    #[test]
    fn test_untagged_inputs_roundtrip_through_json() {
        let json = r#"{"content":"hi","start_coords":[1.5,2.0]}"#;
        let inputs: ActionInputs = serde_json::from_str(json).unwrap();
        assert_eq!(inputs["content"], ActionInput::Text("hi".into()));
        assert_eq!(inputs["start_coords"], ActionInput::Coords(vec![1.5, 2.0]));
    }
}
