//! `OpenAI`-compatible [`ModelProvider`] adapter, gated behind the `openai`
//! feature. Grounded on the teacher's optional `async-openai` dependency
//! under its own agent feature: the provider is a thin wrapper translating
//! this crate's `generate`/`generate_json` calls into chat-completion
//! requests, never exposing `async-openai` types past this module.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;

use crate::error::{ModelError, Result};
use crate::model::{GenerateOptions, ModelProvider, parse_json_response};

/// A [`ModelProvider`] backed by an `OpenAI`-compatible chat-completions
/// endpoint.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    label: String,
}

impl OpenAiProvider {
    /// Creates a provider for `model` using the default `async-openai`
    /// client configuration (reads `OPENAI_API_KEY`/`OPENAI_BASE_URL` from
    /// the environment).
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client: Client::new(),
            label: format!("openai:{model}"),
            model,
        }
    }

    /// Creates a provider pointed at a custom base URL, for
    /// `OpenAI`-compatible self-hosted or third-party endpoints.
    #[must_use]
    pub fn with_base_url(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_base(base_url);
        let model = model.into();
        Self {
            client: Client::with_config(config),
            label: format!("openai:{model}"),
            model,
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, system_prompt: &str, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(options.temperature)
            .max_tokens(options.max_tokens)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|e| ModelError::RequestFailed(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| ModelError::RequestFailed(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::RequestFailed("empty response".to_string()).into())
    }

    async fn generate_json(
        &self,
        system_prompt: &str,
        prompt: &str,
        json_schema: &serde_json::Value,
        options: &GenerateOptions,
    ) -> Result<serde_json::Value> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: "response".to_string(),
                schema: Some(json_schema.clone()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(options.temperature)
            .max_tokens(options.max_tokens)
            .response_format(response_format)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|e| ModelError::RequestFailed(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| ModelError::RequestFailed(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ModelError::RequestFailed(e.to_string()))?;

        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::RequestFailed("empty response".to_string()))?;

        parse_json_response(&raw)
    }
}
