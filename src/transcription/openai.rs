//! The hosted OpenAI Whisper endpoint (spec §4.2 "OpenAI" mode).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::{AudioRef, TranscriptionEngine};
use crate::config::Config;
use crate::error::{Error, Result};

const TIMEOUT: Duration = Duration::from_secs(120);
const API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

pub struct OpenAiEngine {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| Error::Configuration("TRANSCRIPTION_MODE=openai requires OPENAI_API_KEY".into()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_key })
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl TranscriptionEngine for OpenAiEngine {
    async fn transcribe(&self, audio: AudioRef) -> Result<String> {
        let bytes = match audio {
            AudioRef::Bytes(b) => b,
            AudioRef::Path(p) => tokio::fs::read(&p).await?,
        };

        if bytes.len() < 1024 {
            return Ok(String::new());
        }

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name("audio.mp3"))
            .text("model", "whisper-1");

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("OpenAI ASR request failed: {e}")))?;

        if !response.status().is_success() {
            return Ok(String::new());
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("failed to parse OpenAI ASR response: {e}")))?;

        Ok(parsed.text)
    }
}
