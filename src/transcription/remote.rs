//! Remote OpenAI-compatible transcription HTTP service (spec §4.2 "Remote"
//! mode), e.g. a self-hosted `faster-whisper-server`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::{AudioRef, TranscriptionEngine};
use crate::config::Config;
use crate::error::{Error, Result};

const TIMEOUT: Duration = Duration::from_secs(120);

pub struct RemoteEngine {
    client: reqwest::Client,
    base_url: String,
    model: Option<String>,
}

impl RemoteEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .faster_whisper_server_url
            .clone()
            .ok_or_else(|| Error::Configuration("TRANSCRIPTION_MODE=remote requires FASTER_WHISPER_SERVER_URL".into()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            model: config.whisper_model.clone(),
        })
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl TranscriptionEngine for RemoteEngine {
    async fn transcribe(&self, audio: AudioRef) -> Result<String> {
        let bytes = match audio {
            AudioRef::Bytes(b) => b,
            AudioRef::Path(p) => tokio::fs::read(&p).await?,
        };

        if bytes.len() < 1024 {
            return Ok(String::new());
        }

        let mut form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(bytes).file_name("audio.mp3"),
        );
        if let Some(model) = &self.model {
            form = form.text("model", model.clone());
        }

        let url = format!("{}/v1/audio/transcriptions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("remote ASR request failed: {e}")))?;

        if !response.status().is_success() {
            return Ok(String::new());
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("failed to parse remote ASR response: {e}")))?;

        Ok(parsed.text)
    }
}
