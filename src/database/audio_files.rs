//! `audio_files` table access — the legacy database-backed blob fallback
//! (spec §5: "fallback to a database-backed blob if the object store read
//! fails"). Rows here predate the file/S3 store; nothing in this service
//! writes them, but `GET /audio/:id` must still read them when present.

use sqlx::SqlitePool;

use crate::error::Result;

/// The raw bytes stored for `transcription_id`, if a legacy row exists.
pub async fn get(pool: &SqlitePool, transcription_id: i64) -> Result<Option<Vec<u8>>> {
    let bytes = sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT audio_data FROM audio_files WHERE transcription_id = ?",
    )
    .bind(transcription_id)
    .fetch_optional(pool)
    .await?;
    Ok(bytes)
}
