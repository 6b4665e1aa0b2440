//! [`Oracle`] – the decision function consulted once per tick.
//!
//! An oracle maps the current control state `q` and observation `s` to one
//! [`Transition`].  Its output is untrusted: everything it returns goes
//! through the ABI normalizer and the kernel gate before anything executes.
//!
//! This module also holds the text-extraction contract every text-producing
//! oracle shares ([`parse_transition`]) and an in-process [`ScriptedOracle`]
//! used to drive the scheduler deterministically.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use turingos_types::{RouteTrace, Transition};

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call sampling knobs.  The scheduler owns the temperature of each
/// process and raises it as part of trap recovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollapseOptions {
    pub temperature: f64,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self { temperature: 0.2 }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("unparseable oracle output: {0}")]
    Parse(String),
    #[error("oracle script exhausted")]
    Exhausted,
    #[error("every lane failed: {0}")]
    AllLanesFailed(String),
    #[error("oracle timed out after {0} ms")]
    Timeout(u64),
}

#[async_trait]
pub trait Oracle: Send {
    /// Collapse `(q, s)` into the next transition under `discipline`
    /// (the system prompt).
    async fn collapse(
        &mut self,
        discipline: &str,
        q: &str,
        s: &str,
        options: &CollapseOptions,
    ) -> Result<Transition, OracleError>;

    /// Route traces recorded since the last call.  Single-lane oracles keep none.
    fn drain_traces(&mut self) -> Vec<RouteTrace> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Text extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Extract a [`Transition`] from free model text.
///
/// Markdown code fences are stripped, then the outermost `{ … }` span is
/// parsed.  Unknown keys are tolerated here; the ABI decides what the syscall
/// slots mean.
pub fn parse_transition(text: &str) -> Result<Transition, OracleError> {
    let body = strip_code_fence(text.trim());
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => serde_json::from_str(&body[start..=end])
            .map_err(|e| OracleError::Parse(e.to_string())),
        _ => Err(OracleError::Parse("no JSON object in oracle output".into())),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line (```json).
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedOracle
// ─────────────────────────────────────────────────────────────────────────────

/// One recorded [`Oracle::collapse`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedCall {
    pub q: String,
    pub s: String,
    pub temperature: f64,
}

type Responder = Box<dyn FnMut(&str, &str) -> Result<Transition, OracleError> + Send>;

/// Deterministic in-process oracle.
///
/// Either replays a fixed list of answers ([`ScriptedOracle::new`]) or asks a
/// closure over `(q, s)` ([`ScriptedOracle::from_fn`]), which is how
/// multi-process scenarios give planner and workers different behaviour.
///
/// ```
/// use serde_json::json;
/// use turingos_runtime::oracle::{CollapseOptions, Oracle, ScriptedOracle};
/// use turingos_types::Transition;
///
/// # tokio_test_block(async {
/// let mut oracle = ScriptedOracle::new(vec![Ok(Transition::world("done", json!({"op": "SYS_HALT"})))]);
/// let t = oracle.collapse("", "q0", "s0", &CollapseOptions::default()).await.unwrap();
/// assert_eq!(t.q_next, "done");
/// assert!(oracle.collapse("", "q0", "s0", &CollapseOptions::default()).await.is_err());
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct ScriptedOracle {
    responder: Responder,
    calls: Arc<Mutex<Vec<ObservedCall>>>,
}

impl ScriptedOracle {
    /// Replay `script` in order, then fail with [`OracleError::Exhausted`].
    pub fn new(script: Vec<Result<Transition, OracleError>>) -> Self {
        let mut queue: VecDeque<_> = script.into();
        Self::from_fn(move |_, _| queue.pop_front().unwrap_or(Err(OracleError::Exhausted)))
    }

    pub fn from_fn(
        responder: impl FnMut(&str, &str) -> Result<Transition, OracleError> + Send + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of every call, still readable after the oracle is boxed.
    pub fn calls(&self) -> Arc<Mutex<Vec<ObservedCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn collapse(
        &mut self,
        _discipline: &str,
        q: &str,
        s: &str,
        options: &CollapseOptions,
    ) -> Result<Transition, OracleError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ObservedCall {
                q: q.to_string(),
                s: s.to_string(),
                temperature: options.temperature,
            });
        }
        (self.responder)(q, s)
    }
}

/// Never answers its first `stalls` calls, then defers to `inner`.
#[cfg(test)]
pub(crate) struct StallingOracle {
    pub stalls: u32,
    pub inner: ScriptedOracle,
}

#[cfg(test)]
#[async_trait]
impl Oracle for StallingOracle {
    async fn collapse(
        &mut self,
        discipline: &str,
        q: &str,
        s: &str,
        options: &CollapseOptions,
    ) -> Result<Transition, OracleError> {
        if self.stalls > 0 {
            self.stalls -= 1;
            std::future::pending::<()>().await;
        }
        self.inner.collapse(discipline, q, s, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_json() {
        let t = parse_transition(r#"{"q_next": "scan", "world_op": {"op": "SYS_HALT"}}"#).unwrap();
        assert_eq!(t.q_next, "scan");
        assert_eq!(t.world_op, Some(json!({"op": "SYS_HALT"})));
    }

    #[test]
    fn strips_code_fences_and_chatter() {
        let text = "```json\n{\"q_next\": \"a\"}\n```";
        assert_eq!(parse_transition(text).unwrap().q_next, "a");

        let text = "Sure! Here it is: {\"q_next\": \"b\", \"thought\": \"{nested}\"} hope that helps";
        let t = parse_transition(text).unwrap();
        assert_eq!(t.q_next, "b");
        assert_eq!(t.thought.as_deref(), Some("{nested}"));
    }

    #[test]
    fn rejects_text_without_object() {
        assert!(matches!(parse_transition("no idea"), Err(OracleError::Parse(_))));
        assert!(matches!(parse_transition("} {"), Err(OracleError::Parse(_))));
        assert!(matches!(parse_transition("{\"thought\": 1}"), Err(OracleError::Parse(_))));
    }

    #[tokio::test]
    async fn scripted_oracle_replays_then_exhausts() {
        let mut oracle = ScriptedOracle::new(vec![
            Ok(Transition::world("one", json!({"op": "SYS_HALT"}))),
            Err(OracleError::Transport("down".into())),
        ]);
        let calls = oracle.calls();
        let opts = CollapseOptions { temperature: 0.7 };
        assert_eq!(oracle.collapse("", "q", "s", &opts).await.unwrap().q_next, "one");
        assert!(matches!(
            oracle.collapse("", "q", "s", &opts).await,
            Err(OracleError::Transport(_))
        ));
        assert_eq!(
            oracle.collapse("", "q", "s", &opts).await,
            Err(OracleError::Exhausted)
        );
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].temperature, 0.7);
        assert!(oracle.drain_traces().is_empty());
    }
}
