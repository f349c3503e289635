//! Ollama-backed `LLMClient`, used when `AI_PROVIDER=ollama` (the default).

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;

use super::{LLMClient, LLMRequest, LLMResponse};
use crate::error::{Error, Result};

pub struct OllamaClient {
    client: Ollama,
    default_model: String,
}

impl OllamaClient {
    pub fn new(base_url: String, default_model: String) -> Self {
        let client = match url::Url::parse(&base_url) {
            Ok(parsed) => {
                let host = format!(
                    "{}://{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or("localhost")
                );
                let port = parsed.port().unwrap_or(11434);
                Ollama::new(host, port)
            }
            Err(_) => Ollama::default(),
        };

        Self {
            client,
            default_model,
        }
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut prompt = request.prompt;
        if let Some(system) = &request.system {
            prompt = format!("{system}\n\n{prompt}");
        }

        let options = GenerationOptions::default()
            .temperature(request.temperature)
            .num_predict(request.max_tokens as i32);

        let gen_request = GenerationRequest::new(model.clone(), prompt).options(options);

        let response = self
            .client
            .generate(gen_request)
            .await
            .map_err(|e| Error::Other(format!("ollama generation failed: {e}")))?;

        Ok(LLMResponse {
            content: response.response,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_host_on_unparsable_url() {
        let client = OllamaClient::new("not a url".into(), "llama3".into());
        assert_eq!(client.default_model, "llama3");
    }
}
