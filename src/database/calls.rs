//! `transcriptions` table access — the `Call` entity from the data model.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;

/// A single radio call record.
///
/// Invariants enforced at the SQL layer (`CHECK` constraints) and re-checked
/// by callers that mutate a row: `(lat IS NULL) == (lon IS NULL)`, and
/// `lat IS NULL` whenever `address IS NULL`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Call {
    pub id: i64,
    pub talk_group_id: String,
    pub timestamp: i64,
    pub transcription: String,
    pub audio_file_path: String,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub category: Option<String>,
    pub errors: i64,
    pub spikes: i64,
    pub source_id: Option<String>,
    pub created_at: i64,
    pub audio_purged_at: Option<i64>,
}

pub struct NewCall<'a> {
    pub talk_group_id: &'a str,
    pub timestamp: i64,
    pub audio_file_path: &'a str,
    pub errors: i64,
    pub spikes: i64,
    pub source_id: Option<&'a str>,
}

/// Insert a new call with an empty transcription. Returns the assigned id.
///
/// `audio_file_path` is unique per call (spec §3): a conflicting insert is
/// surfaced to the caller as a SQL error rather than silently ignored, since
/// it would indicate the same audio blob was already ingested.
pub async fn insert(pool: &SqlitePool, call: NewCall<'_>) -> Result<i64> {
    let created_at = Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO transcriptions
            (talk_group_id, timestamp, transcription, audio_file_path, errors, spikes, source_id, created_at)
        VALUES (?, ?, '', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(call.talk_group_id)
    .bind(call.timestamp)
    .bind(call.audio_file_path)
    .bind(call.errors)
    .bind(call.spikes)
    .bind(call.source_id)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Delete a call row. Used to roll back when audio persistence succeeded
/// but the DB insert that should follow it failed, or vice versa.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM transcriptions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set the transcription text. Called exactly once per call by the pipeline.
pub async fn update_transcription(pool: &SqlitePool, id: i64, text: &str) -> Result<()> {
    sqlx::query("UPDATE transcriptions SET transcription = ? WHERE id = ?")
        .bind(text)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Set geocoded coordinates and the formatted address, and rewrite the
/// stored transcript (with the address hyperlinked). Called at most once.
pub async fn update_coordinates(
    pool: &SqlitePool,
    id: i64,
    lat: f64,
    lon: f64,
    address: &str,
    transcription: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE transcriptions SET lat = ?, lon = ?, address = ?, transcription = ? WHERE id = ?",
    )
    .bind(lat)
    .bind(lon)
    .bind(address)
    .bind(transcription)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Set the category label computed by the map-loop classifier. Persisted so
/// later polls never re-classify the same call.
pub async fn update_category(pool: &SqlitePool, id: i64, category: &str) -> Result<()> {
    sqlx::query("UPDATE transcriptions SET category = ? WHERE id = ?")
        .bind(category)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Call>> {
    let call = sqlx::query_as::<_, Call>("SELECT * FROM transcriptions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(call)
}

/// Calls with id greater than `last_id`, oldest first, capped at `limit`.
/// Used by both live-fanout polling loops (§4.5); `only_mapped_coords`
/// restricts to calls that already have non-null coordinates (map loop).
pub async fn list_since(
    pool: &SqlitePool,
    last_id: i64,
    limit: i64,
    only_with_coords: bool,
) -> Result<Vec<Call>> {
    let calls = if only_with_coords {
        sqlx::query_as::<_, Call>(
            "SELECT * FROM transcriptions WHERE id > ? AND lat IS NOT NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(last_id)
        .bind(limit)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, Call>(
            "SELECT * FROM transcriptions WHERE id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(last_id)
        .bind(limit)
        .fetch_all(pool)
        .await?
    };
    Ok(calls)
}

/// Calls within the last `hours` hours that have non-null coordinates
/// (`GET /api/calls?hours=H`).
pub async fn list_recent_with_coords(pool: &SqlitePool, hours: i64) -> Result<Vec<Call>> {
    let since = Utc::now().timestamp() - hours * 3600;
    let calls = sqlx::query_as::<_, Call>(
        "SELECT * FROM transcriptions WHERE timestamp >= ? AND lat IS NOT NULL ORDER BY timestamp DESC",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(calls)
}

/// `GET /api/talkgroup/:id/calls?sinceId&limit&offset`
pub async fn list_for_talkgroup(
    pool: &SqlitePool,
    talk_group_id: &str,
    since_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Call>> {
    let calls = sqlx::query_as::<_, Call>(
        r#"
        SELECT * FROM transcriptions
        WHERE talk_group_id = ? AND id > ?
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(talk_group_id)
    .bind(since_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(calls)
}

/// `GET /api/additional-transcriptions/:callId?skip=K` — later calls on the
/// same talkgroup, used by the web client to page through context around a
/// selected call.
pub async fn additional_transcriptions(
    pool: &SqlitePool,
    call_id: i64,
    skip: i64,
    limit: i64,
) -> Result<Vec<Call>> {
    let Some(anchor) = get(pool, call_id).await? else {
        return Ok(Vec::new());
    };

    let calls = sqlx::query_as::<_, Call>(
        r#"
        SELECT * FROM transcriptions
        WHERE talk_group_id = ? AND id != ?
        ORDER BY ABS(id - ?) ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&anchor.talk_group_id)
    .bind(call_id)
    .bind(call_id)
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(calls)
}

/// Transcripts within the last `lookback_hours` hours for one talkgroup,
/// oldest first — feeds both the Ask-AI handler and the summariser's
/// per-talkgroup candidate selection.
pub async fn transcripts_in_window(
    pool: &SqlitePool,
    talk_group_id: Option<&str>,
    lookback_hours: i64,
) -> Result<Vec<Call>> {
    let since = Utc::now().timestamp() - lookback_hours * 3600;
    let calls = match talk_group_id {
        Some(tg) => {
            sqlx::query_as::<_, Call>(
                "SELECT * FROM transcriptions WHERE talk_group_id = ? AND timestamp >= ? AND transcription != '' ORDER BY timestamp ASC",
            )
            .bind(tg)
            .bind(since)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Call>(
                "SELECT * FROM transcriptions WHERE timestamp >= ? AND transcription != '' ORDER BY timestamp ASC",
            )
            .bind(since)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(calls)
}

/// `PUT /api/markers/:id/location` — admin-only coordinate override.
pub async fn set_marker_location(pool: &SqlitePool, id: i64, lat: f64, lon: f64) -> Result<()> {
    sqlx::query("UPDATE transcriptions SET lat = ?, lon = ? WHERE id = ?")
        .bind(lat)
        .bind(lon)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// `DELETE /api/markers/:id` — admin-only: clears coordinates and address
/// without deleting the underlying call record.
pub async fn clear_marker(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE transcriptions SET lat = NULL, lon = NULL, address = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Calls whose audio is old enough to garbage-collect (spec §3: retained
/// `AUDIO_RETENTION_DAYS`, default 7, then purged) and hasn't been purged yet.
pub async fn audio_gc_candidates(pool: &SqlitePool, cutoff_ts: i64) -> Result<Vec<Call>> {
    let calls = sqlx::query_as::<_, Call>(
        "SELECT * FROM transcriptions WHERE timestamp < ? AND audio_purged_at IS NULL",
    )
    .bind(cutoff_ts)
    .fetch_all(pool)
    .await?;
    Ok(calls)
}

/// Record that a call's audio blob was removed from the object/file store,
/// so the next GC run doesn't retry it (the metadata row itself is kept).
pub async fn mark_audio_purged(pool: &SqlitePool, id: i64, purged_at: i64) -> Result<()> {
    sqlx::query("UPDATE transcriptions SET audio_purged_at = ? WHERE id = ?")
        .bind(purged_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let pool = test_pool().await;
        let id = insert(
            &pool,
            NewCall {
                talk_group_id: "101",
                timestamp: 1_700_000_000,
                audio_file_path: "20231114_120000_sys_101_TO_101_FROM_9999.mp3",
                errors: 0,
                spikes: 0,
                source_id: Some("9999"),
            },
        )
        .await
        .unwrap();

        let call = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(call.talk_group_id, "101");
        assert_eq!(call.transcription, "");
        assert!(call.lat.is_none());
        assert!(call.lon.is_none());
    }

    #[tokio::test]
    async fn coordinates_invariant_holds_after_update() {
        let pool = test_pool().await;
        let id = insert(
            &pool,
            NewCall {
                talk_group_id: "101",
                timestamp: 1_700_000_000,
                audio_file_path: "a.mp3",
                errors: 0,
                spikes: 0,
                source_id: None,
            },
        )
        .await
        .unwrap();

        update_coordinates(&pool, id, 41.0, -74.0, "123 Main St", "fire at 123 Main St")
            .await
            .unwrap();

        let call = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(call.lat.is_some(), call.lon.is_some());
        assert!(call.transcription.contains("123 Main St"));
    }

    #[tokio::test]
    async fn list_since_advances_only_past_emitted_ids() {
        let pool = test_pool().await;
        let mut last_id = None;
        for i in 0..3 {
            let id = insert(
                &pool,
                NewCall {
                    talk_group_id: "101",
                    timestamp: 1_700_000_000 + i,
                    audio_file_path: &format!("call_{i}.mp3"),
                    errors: 0,
                    spikes: 0,
                    source_id: None,
                },
            )
            .await
            .unwrap();
            last_id = Some(id);
        }

        let calls = list_since(&pool, 0, 10, false).await.unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls.last().unwrap().id, last_id.unwrap());
    }

    #[tokio::test]
    async fn audio_gc_skips_already_purged_calls() {
        let pool = test_pool().await;
        let old_id = insert(
            &pool,
            NewCall {
                talk_group_id: "101",
                timestamp: 1_000_000,
                audio_file_path: "old.mp3",
                errors: 0,
                spikes: 0,
                source_id: None,
            },
        )
        .await
        .unwrap();
        insert(
            &pool,
            NewCall {
                talk_group_id: "101",
                timestamp: 2_000_000,
                audio_file_path: "recent.mp3",
                errors: 0,
                spikes: 0,
                source_id: None,
            },
        )
        .await
        .unwrap();

        let candidates = audio_gc_candidates(&pool, 1_500_000).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, old_id);

        mark_audio_purged(&pool, old_id, 1_700_000_000).await.unwrap();
        let candidates = audio_gc_candidates(&pool, 1_500_000).await.unwrap();
        assert!(candidates.is_empty());
    }
}
