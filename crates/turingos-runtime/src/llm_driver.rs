//! [`LlmOracle`] – OpenAI-compatible chat-completions oracle.
//!
//! Talks to any server exposing `/v1/chat/completions` (Ollama, vLLM, a
//! hosted API).  The discipline becomes the system message, `q` and `s` the
//! user message, and the [`Transition`] JSON Schema is sent as
//! `response_format` so servers that support structured output return a
//! parseable object.  The reply text then goes through
//! [`parse_transition`][crate::oracle::parse_transition], so servers that
//! ignore the schema still work as long as they emit one JSON object.
//!
//! # Example
//!
//! ```rust,no_run
//! use turingos_runtime::llm_driver::LlmOracle;
//!
//! let oracle = LlmOracle::new("http://localhost:11434", "llama3")
//!     .with_api_key(std::env::var("TURINGOS_API_KEY").ok());
//! // Box it as a `dyn Oracle` and hand it to the tick engine.
//! ```

use std::time::Duration;

use async_trait::async_trait;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use turingos_types::Transition;

use crate::oracle::{CollapseOptions, Oracle, OracleError, parse_transition};

// ─────────────────────────────────────────────────────────────────────────────
// Stability guidelines
// ─────────────────────────────────────────────────────────────────────────────

/// Anti-loop rules appended to every system message.
pub const STABILITY_GUIDELINES: &str = "\
## Stability Guidelines (anti-loop rules)
- Do not emit the same transition more than 3 times in a row.
- If a world op fails or traps, change approach instead of retrying it unchanged.
- Put at most one syscall in world_op; task bookkeeping belongs in mind_ops.
- Never point d at sys://trap/ pointers; they are kernel-owned.
- After a [HALT_REJECTED] block, fix what the feedback names before halting again.";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Http(e) => OracleError::Transport(e.to_string()),
            LlmError::BadResponse(details) => OracleError::Parse(details),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt shaping
// ─────────────────────────────────────────────────────────────────────────────

/// Append [`STABILITY_GUIDELINES`] to every system message, prepending one
/// if the conversation has none.
pub fn with_guidelines(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut augmented: Vec<ChatMessage> = messages
        .iter()
        .map(|m| {
            if m.role == ChatRole::System {
                ChatMessage::system(format!("{}\n\n{}", m.content, STABILITY_GUIDELINES))
            } else {
                m.clone()
            }
        })
        .collect();
    if !augmented.iter().any(|m| m.role == ChatRole::System) {
        augmented.insert(0, ChatMessage::system(STABILITY_GUIDELINES));
    }
    augmented
}

/// User message carrying the two registers' worth of context.
pub fn render_prompt(q: &str, s: &str) -> String {
    format!(
        "[STATE q]\n{q}\n\n[OBSERVATION s]\n{s}\n\nRespond with exactly one Transition JSON object."
    )
}

/// `response_format.json_schema` payload for [`Transition`].
pub fn transition_schema() -> serde_json::Value {
    let schema = serde_json::to_value(schema_for!(Transition)).unwrap_or(serde_json::Value::Null);
    serde_json::json!({ "name": "transition", "schema": schema })
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmOracle
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request limit unless [`LlmOracle::with_timeout`] says otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Async client for one chat-completions endpoint.  Construct once per lane.
pub struct LlmOracle {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmOracle {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Bound every request, connect included.  A timed-out request surfaces
    /// as [`OracleError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_client(timeout);
        self
    }

    /// Bearer token sent with every request.  `None` or blank sends none.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// [`LlmError::Http`] if the request fails or the server answers with an
    /// error status, [`LlmError::BadResponse`] if no choice came back.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<String, LlmError> {
        let augmented = with_guidelines(messages);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &augmented,
            temperature,
            stream: false,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: transition_schema(),
            },
        };

        let mut request = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "HTTP client builder failed; using per-request timeouts only");
            reqwest::Client::new()
        })
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn collapse(
        &mut self,
        discipline: &str,
        q: &str,
        s: &str,
        options: &CollapseOptions,
    ) -> Result<Transition, OracleError> {
        let messages = [ChatMessage::system(discipline), ChatMessage::user(render_prompt(q, s))];
        let text = self
            .complete(&messages, options.temperature)
            .await
            .map_err(|err| match err {
                LlmError::Http(e) if e.is_timeout() => {
                    OracleError::Timeout(self.timeout.as_millis() as u64)
                }
                other => other.into(),
            })?;
        debug!(model = %self.model, chars = text.len(), "oracle replied");
        parse_transition(&text)
    }
}
