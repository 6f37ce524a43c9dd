//! Workflow step shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on loop iterations, for both `repeat` and `each`.
pub const MAX_LOOP_ITERATIONS: u64 = 100;

/// One workflow step: a leaf command or a loop over nested steps.
///
/// Untagged: a step with a `steps` array is a loop, anything with a `cmd`
/// is a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Loop(LoopStep),
    Leaf(LeafStep),
}

/// A single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafStep {
    /// Command name; short aliases (`go`, `js`) resolve to tool names.
    pub cmd: String,
    #[serde(default)]
    pub args: Value,
    /// Capture the reply into this variable.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
}

impl LeafStep {
    pub fn new(cmd: impl Into<String>, args: Value) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            capture: None,
        }
    }

    pub fn capturing(mut self, name: impl Into<String>) -> Self {
        self.capture = Some(name.into());
        self
    }
}

/// A bounded loop: fixed count or iteration over a captured array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStep {
    /// Fixed iteration count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u64>,
    /// Variable expression (`%{urls}`) resolving to an array to iterate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub each: Option<String>,
    /// Name each element binds to inside the body (default `item`).
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    pub steps: Vec<Step>,
    /// Evaluated after each iteration; a truthy result exits the loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<LeafStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_parses_from_json() {
        let raw = r#"{"cmd": "go", "args": {"url": "https://example.org"}, "as": "nav"}"#;
        let step: Step = serde_json::from_str(raw).unwrap();
        let Step::Leaf(leaf) = step else {
            panic!("expected a leaf");
        };
        assert_eq!(leaf.cmd, "go");
        assert_eq!(leaf.capture.as_deref(), Some("nav"));
        assert_eq!(leaf.args["url"], "https://example.org");
    }

    #[test]
    fn loop_parses_before_leaf() {
        let raw = r#"{"each": "%{urls}", "as": "u", "steps": [{"cmd": "go", "args": {"url": "%{u}"}}]}"#;
        let step: Step = serde_json::from_str(raw).unwrap();
        let Step::Loop(l) = step else {
            panic!("expected a loop");
        };
        assert_eq!(l.each.as_deref(), Some("%{urls}"));
        assert_eq!(l.bind.as_deref(), Some("u"));
        assert_eq!(l.steps.len(), 1);
        assert!(l.until.is_none());
    }

    #[test]
    fn repeat_loop_with_until() {
        let raw = r#"{"repeat": 5, "steps": [{"cmd": "scroll"}], "until": {"cmd": "js", "args": {"expr": "done"}}}"#;
        let step: Step = serde_json::from_str(raw).unwrap();
        let Step::Loop(l) = step else {
            panic!("expected a loop");
        };
        assert_eq!(l.repeat, Some(5));
        assert!(l.until.is_some());
    }

    #[test]
    fn step_list_round_trips() {
        let steps = vec![
            Step::Leaf(LeafStep::new("go", serde_json::json!({"url": "https://a"}))),
            Step::Loop(LoopStep {
                repeat: Some(3),
                each: None,
                bind: None,
                steps: vec![Step::Leaf(LeafStep::new("scroll", Value::Null))],
                until: None,
            }),
        ];
        let json = serde_json::to_string(&steps).unwrap();
        let back: Vec<Step> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert!(matches!(back[1], Step::Loop(_)));
    }
}
