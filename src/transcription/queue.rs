//! Bounded worker pool in front of a [`TranscriptionEngine`] (spec §4.2
//! "Queue discipline"). A `tokio::sync::Semaphore` caps concurrency; each job
//! gets up to 2 retries on transport error with a short backoff, and a hard
//! timeout that degrades to an empty transcription rather than stalling the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::{AudioRef, TranscriptionEngine};
use crate::error::Error;

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);
const JOB_TIMEOUT: Duration = Duration::from_secs(130);

pub struct TranscriptionQueue {
    engine: Arc<dyn TranscriptionEngine>,
    semaphore: Arc<Semaphore>,
}

impl TranscriptionQueue {
    pub fn new(engine: Arc<dyn TranscriptionEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Transcribe one call's audio. Never returns `Err` for ASR-level
    /// failures — an empty string is the valid terminal state the pipeline
    /// treats as "skip extraction but persist and fan out" (spec §4.2).
    pub async fn submit(&self, audio: AudioRef) -> String {
        let _permit = match self.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => return String::new(),
        };

        let mut attempt = 0;
        loop {
            let job = self.engine.transcribe(audio.clone());
            match tokio::time::timeout(JOB_TIMEOUT, job).await {
                Ok(Ok(text)) => return text,
                Ok(Err(Error::TranscriptionFailed(_))) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, attempt, "transcription failed; giving up");
                    return String::new();
                }
                Err(_elapsed) => {
                    tracing::warn!("transcription timed out");
                    return String::new();
                }
            }
        }
    }
}
