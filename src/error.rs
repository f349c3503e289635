//! Error taxonomy for CallRelay.
//!
//! Each variant corresponds to one of the error kinds in the design: upload
//! validation, auth, storage, transcription, extraction, geocoding, fan-out
//! and ASR child lifecycle. Lower-level library errors convert into `Other`
//! or a specific variant at the point they're first handled, so call sites
//! further up only ever match on the taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unparsable multipart field; surfaces as 400 to the uploader.
    #[error("upload malformed: {0}")]
    UploadMalformed(String),

    /// Unknown or disabled API key; surfaces as 401.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Object-store or disk write failed; surfaces as 500, triggers rollback.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Transport, timeout, or invalid audio during transcription. Recovered
    /// locally: callers persist an empty transcription and continue.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Transcript too short, talkgroup unmapped, or the LLM returned the
    /// sentinel. Recovered locally: call is persisted without coordinates.
    #[error("extraction skipped: {0}")]
    ExtractionSkipped(String),

    /// Geocoding provider error, out-of-region match, or low-specificity
    /// result. Recovered locally: call is persisted without coordinates.
    #[error("geocode rejected: {0}")]
    GeocodeRejected(String),

    /// Discord API call failed. Recovered locally: cache entry evicted,
    /// retried on the next call.
    #[error("fanout transient error: {0}")]
    FanoutTransient(String),

    /// Local ASR child process exited. All pending jobs are failed and a
    /// restart is scheduled.
    #[error("ASR child died: {0}")]
    ChildDied(String),

    /// Configuration missing or invalid at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("discord API error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should surface to the HTTP uploader instead of
    /// being absorbed by a downstream pipeline stage (spec §7 propagation
    /// policy: only UploadMalformed, AuthFailed and StorageUnavailable do).
    pub fn surfaces_to_uploader(&self) -> bool {
        matches!(
            self,
            Error::UploadMalformed(_) | Error::AuthFailed(_) | Error::StorageUnavailable(_)
        )
    }
}
