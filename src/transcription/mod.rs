//! Transcription engine abstraction (spec §4.2): one `transcribe` method,
//! four selectable implementations, and a bounded worker pool in front of
//! whichever is configured.

pub mod icad;
pub mod local;
pub mod openai;
pub mod queue;
pub mod remote;

use async_trait::async_trait;

use crate::config::{Config, TranscriptionMode};
use crate::error::Result;

/// What to transcribe: either a path the engine can read directly (local
/// filesystem storage) or raw bytes (object storage, where the ASR child has
/// no access to the bucket — spec §4.2 selection rule).
#[derive(Debug, Clone)]
pub enum AudioRef {
    Path(std::path::PathBuf),
    Bytes(Vec<u8>),
}

#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, audio: AudioRef) -> Result<String>;
}

/// Build the configured engine. Called once at startup.
pub fn build_engine(config: &Config) -> Result<std::sync::Arc<dyn TranscriptionEngine>> {
    match config.transcription_mode {
        TranscriptionMode::Local => Ok(std::sync::Arc::new(local::LocalEngine::spawn(config)?)),
        TranscriptionMode::Remote => Ok(std::sync::Arc::new(remote::RemoteEngine::new(config)?)),
        TranscriptionMode::Openai => Ok(std::sync::Arc::new(openai::OpenAiEngine::new(config)?)),
        TranscriptionMode::Icad => Ok(std::sync::Arc::new(icad::IcadEngine::new(config)?)),
    }
}
