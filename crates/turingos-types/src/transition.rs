//! Oracle output for one tick.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One oracle response.
///
/// The syscall slots are kept as raw JSON: the oracle is untrusted, and the
/// ABI normalizer decides whether each slot is a valid [`Syscall`].
///
/// [`Syscall`]: crate::Syscall
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    /// Free-text rationale. Journaled, never executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Next control state.
    pub q_next: String,
    /// Legacy single-syscall slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_t: Option<Value>,
    /// Scheduling syscalls, executed first and in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mind_ops: Option<Vec<Value>>,
    /// The single world syscall, executed last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_op: Option<Value>,
}

impl Transition {
    /// `true` when the VLIW pair is used instead of the legacy `a_t` slot.
    pub fn is_vliw(&self) -> bool {
        self.mind_ops.is_some() || self.world_op.is_some()
    }

    /// Shorthand used by tests and scripted oracles.
    pub fn world(q_next: impl Into<String>, world_op: Value) -> Self {
        Self {
            q_next: q_next.into(),
            world_op: Some(world_op),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_transition_parses() {
        let t: Transition = serde_json::from_value(json!({ "q_next": "scan" })).unwrap();
        assert_eq!(t.q_next, "scan");
        assert!(!t.is_vliw());
    }

    #[test]
    fn missing_q_next_is_rejected() {
        let result: Result<Transition, _> =
            serde_json::from_value(json!({ "a_t": { "op": "SYS_HALT" } }));
        assert!(result.is_err());
    }

    #[test]
    fn vliw_detection() {
        let t = Transition::world("go", json!({ "op": "SYS_GOTO", "pointer": "a.txt" }));
        assert!(t.is_vliw());
    }

    #[test]
    fn schema_mentions_vliw_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(Transition)).unwrap();
        let text = schema.to_string();
        assert!(text.contains("mind_ops"));
        assert!(text.contains("world_op"));
        assert!(text.contains("q_next"));
    }
}
