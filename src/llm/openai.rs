//! OpenAI-backed `LLMClient`, used when `AI_PROVIDER=openai`.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use super::{LLMClient, LLMRequest, LLMResponse};
use crate::error::{Error, Result};

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    default_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, default_model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            default_model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.as_str())
                    .build()
                    .map_err(|e| Error::Other(format!("failed to build system message: {e}")))?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.as_str())
                .build()
                .map_err(|e| Error::Other(format!("failed to build user message: {e}")))?
                .into(),
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model.clone())
            .messages(messages)
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()
            .map_err(|e| Error::Other(format!("failed to build chat request: {e}")))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| Error::Other(format!("openai request failed: {e}")))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Other("openai response had no choices".into()))?;

        Ok(LLMResponse {
            content,
            model: response.model,
        })
    }
}
