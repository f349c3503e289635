//! ICAD-compatible radio-ASR service (spec §4.2 "ICAD" mode) — same shape as
//! [`super::remote`] plus a profile selector.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::{AudioRef, TranscriptionEngine};
use crate::config::Config;
use crate::error::{Error, Result};

const TIMEOUT: Duration = Duration::from_secs(120);

pub struct IcadEngine {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    profile: Option<String>,
}

impl IcadEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let url = config
            .icad_url
            .clone()
            .ok_or_else(|| Error::Configuration("TRANSCRIPTION_MODE=icad requires ICAD_URL".into()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            api_key: config.icad_api_key.clone(),
            profile: config.icad_profile.clone(),
        })
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl TranscriptionEngine for IcadEngine {
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
        if let Some(profile) = &self.profile {
            form = form.text("profile", profile.clone());
        }

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("ICAD request failed: {e}")))?;

        if !response.status().is_success() {
            return Ok(String::new());
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("failed to parse ICAD response: {e}")))?;

        Ok(parsed.text)
    }
}
