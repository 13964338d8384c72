//! Language-model completion providers
//!
//! The translator only needs "prompt in, text out". [`CompletionProvider`] is
//! that seam; [`OpenAiProvider`] is the production implementation.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("No response content from model")]
    EmptyResponse,
}

/// System instruction plus user message for a single completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate_completion(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

/// Chat-completions client with fixed model and sampling settings
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(client: Client<OpenAIConfig>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn from_api_key(api_key: impl Into<String>, config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self::new(Client::with_config(openai_config), config)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[allow(deprecated)]
    fn build_request(&self, prompt: &Prompt) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.system.as_str())
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.user.as_str())
                    .build()?,
            ),
        ];

        CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn generate_completion(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let request = self.build_request(prompt)?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        tracing::debug!(model = %self.model, chars = content.len(), "LLM response received");

        Ok(content)
    }
}
