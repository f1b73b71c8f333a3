//! A deterministic, scripted [`ModelProvider`] for tests and the CLI
//! demonstrator. Grounded on the teacher's "stateless components with
//! injected interfaces" design note: nodes never know whether they are
//! talking to a real provider or this one.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{GenerateOptions, ModelProvider, parse_json_response};

/// A single scripted response: either free-form text (consumed by
/// [`ModelProvider::generate`]) or a JSON value (consumed by
/// [`ModelProvider::generate_json`]).
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Returned verbatim by the next `generate` call.
    Text(String),
    /// Returned verbatim by the next `generate_json` call.
    Json(serde_json::Value),
}

/// Replays a fixed queue of responses in call order, regardless of prompt
/// content. Panics (in test code only) if the queue is exhausted, since an
/// under-scripted test is a test bug, not a runtime condition to handle
/// gracefully.
pub struct MockModelProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
}

impl MockModelProvider {
    /// Creates a provider that replays `responses` in order.
    #[must_use]
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    /// Creates a provider that always returns the same JSON value.
    #[must_use]
    pub fn constant_json(value: serde_json::Value) -> Self {
        Self::new(vec![ScriptedResponse::Json(value)])
    }
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _system_prompt: &str, _prompt: &str, _options: &GenerateOptions) -> Result<String> {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.responses.lock().unwrap();
        match guard.pop_front() {
            Some(ScriptedResponse::Text(text)) => Ok(text),
            Some(ScriptedResponse::Json(value)) => Ok(value.to_string()),
            None => Ok(String::new()),
        }
    }

    async fn generate_json(
        &self,
        _system_prompt: &str,
        _prompt: &str,
        _json_schema: &serde_json::Value,
        _options: &GenerateOptions,
    ) -> Result<serde_json::Value> {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.responses.lock().unwrap();
        match guard.pop_front() {
            Some(ScriptedResponse::Json(value)) => Ok(value),
            Some(ScriptedResponse::Text(text)) => parse_json_response(&text),
            None => Ok(serde_json::json!({})),
        }
    }
}
