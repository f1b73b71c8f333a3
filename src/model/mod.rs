//! The model-provider contract.
//!
//! Grounded on the sibling fan-out orchestrator's `LlmProvider` trait
//! (`Arc<dyn LlmProvider>` shared across spawned subagent tasks, a `name()`
//! method used for diagnostics) and the teacher's optional `async-openai`
//! dependency gated behind a Cargo feature. Every node that needs a model
//! call (router, planner, filter generator, synthesizer, quality gates)
//! takes `&dyn ModelProvider`, so production code and tests share the exact
//! same call sites.

pub mod mock;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{ModelError, Result};

/// Sampling/formatting options for a single model call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature; lower is more deterministic.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// Contract with an LLM provider for both free-form and schema-constrained
/// generation.
///
/// Implementations must be `Send + Sync` so one provider can be shared via
/// `Arc<dyn ModelProvider>` across every node and, within the retriever,
/// across fan-out tasks — matching the sibling orchestrator's
/// `Arc<dyn LlmProvider>`. Kept object-safe (no generic methods) for that
/// reason; the generic, type-checked entry point nodes actually call is
/// [`generate_structured`], a free function built on top of
/// [`ModelProvider::generate_json`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A short identifier used in `tracing` spans and error messages (e.g.
    /// `"mock"`, `"openai:gpt-4o-mini"`).
    fn name(&self) -> &str;

    /// Generates free-form text for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::RequestFailed`] or [`ModelError::Timeout`] if
    /// the underlying call fails.
    async fn generate(&self, system_prompt: &str, prompt: &str, options: &GenerateOptions) -> Result<String>;

    /// Generates a JSON value constrained by `json_schema`, either via a
    /// native structured-output API or by instructing the model and
    /// validating the raw response as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SchemaMismatch`] if the response is not valid
    /// JSON, or a request-level error otherwise.
    async fn generate_json(
        &self,
        system_prompt: &str,
        prompt: &str,
        json_schema: &serde_json::Value,
        options: &GenerateOptions,
    ) -> Result<serde_json::Value>;
}

/// Generates structured output conforming to `T` by calling
/// [`ModelProvider::generate_json`] and deserializing the result.
///
/// # Errors
///
/// Returns [`ModelError::SchemaMismatch`] if the provider's JSON value does
/// not match `T`'s shape, or whatever error `generate_json` returned.
pub async fn generate_structured<T: DeserializeOwned>(
    provider: &dyn ModelProvider,
    system_prompt: &str,
    prompt: &str,
    json_schema: &serde_json::Value,
    options: &GenerateOptions,
) -> Result<T> {
    let value = provider.generate_json(system_prompt, prompt, json_schema, options).await?;
    serde_json::from_value(value).map_err(|e| ModelError::SchemaMismatch(e.to_string()).into())
}

/// Parses a model's raw text response as JSON into `T`, wrapping any
/// failure as [`ModelError::SchemaMismatch`]. Shared by every
/// [`ModelProvider`] implementation's `generate_structured`.
///
/// # Errors
///
/// Returns [`ModelError::SchemaMismatch`] if `raw` is not valid JSON or
/// does not match `T`'s shape.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = strip_code_fence(raw);
    serde_json::from_str(trimmed).map_err(|e| ModelError::SchemaMismatch(e.to_string()).into())
}

/// Parses a model's raw text response as a [`serde_json::Value`], stripping
/// a Markdown code fence if present. Used by [`ModelProvider::generate_json`]
/// implementations that only have a text-completion API available.
///
/// # Errors
///
/// Returns [`ModelError::SchemaMismatch`] if `raw` is not valid JSON.
pub(crate) fn parse_json_response(raw: &str) -> Result<serde_json::Value> {
    let trimmed = strip_code_fence(raw);
    serde_json::from_str(trimmed).map_err(|e| ModelError::SchemaMismatch(e.to_string()).into())
}

/// Strips a leading/trailing Markdown code fence (` ```json ... ``` ` or
/// ` ``` ... ``` `), if present, since models frequently wrap JSON output in
/// one despite instructions not to.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
