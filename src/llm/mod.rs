//! LLM client abstraction shared by the address extractor, the map-category
//! classifier, and the periodic summariser/Ask-AI handler.
//!
//! One provider is selected at startup from `AI_PROVIDER` and stored behind
//! an `Arc<dyn LLMClient>`; everything downstream only ever sees the trait.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AiProvider, Config};
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct LLMRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse>;
}

/// Build the configured provider. Called once at startup.
pub fn build_client(config: &Config) -> Result<std::sync::Arc<dyn LLMClient>> {
    match config.ai_provider {
        AiProvider::Ollama => Ok(std::sync::Arc::new(ollama::OllamaClient::new(
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        ))),
        AiProvider::Openai => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                crate::error::Error::Configuration(
                    "AI_PROVIDER=openai requires OPENAI_API_KEY".into(),
                )
            })?;
            Ok(std::sync::Arc::new(openai::OpenAiClient::new(
                api_key,
                config.openai_model.clone(),
            )))
        }
    }
}
