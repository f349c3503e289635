//! Live map/feed fan-out (spec §4.5): two independent polling loops pushed
//! out over Socket.IO, each tracking its own watermark so calls are only
//! ever advanced past once they were actually emitted.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use socketioxide::SocketIo;
use tokio::sync::Notify;

use crate::database::{calls, Call, Database};
use crate::llm::{LLMClient, LLMRequest};

const MAP_POLL_INTERVAL: Duration = Duration::from_millis(2000);
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(2500);
const BATCH_CAP: i64 = 10;
const PLACEHOLDER_WAIT_SECS: i64 = 10;
const PLACEHOLDER_TEXT: &str = "[Transcription Pending...]";

const INCIDENT_CATEGORIES: &[&str] = &["FIRE", "MEDICAL", "TRAFFIC", "CRIME", "HAZMAT", "OTHER"];

/// Per-loop progress markers, plus a [`Notify`] the pipeline pings after
/// publishing a call so both loops can wake early instead of waiting out
/// their full tick (spec §5: calls are free to interleave, but there is no
/// reason to make the live feed wait a full poll interval unnecessarily).
pub struct Watermarks {
    map_last_id: AtomicI64,
    feed_last_id: AtomicI64,
    notify: Notify,
}

impl Watermarks {
    pub fn new() -> Self {
        Self {
            map_last_id: AtomicI64::new(0),
            feed_last_id: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn notify_ready(&self, _call_id: i64) {
        self.notify.notify_waiters();
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct LivePayload {
    id: i64,
    talk_group_id: String,
    timestamp: i64,
    transcription: String,
    address: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    category: Option<String>,
    audio_url: String,
}

impl LivePayload {
    fn from_call(call: &Call, placeholder: bool) -> Self {
        Self {
            id: call.id,
            talk_group_id: call.talk_group_id.clone(),
            timestamp: call.timestamp,
            transcription: if placeholder {
                PLACEHOLDER_TEXT.to_string()
            } else {
                call.transcription.clone()
            },
            address: call.address.clone(),
            lat: call.lat,
            lon: call.lon,
            category: call.category.clone(),
            audio_url: format!("/audio/{}", call.id),
        }
    }
}

/// True once a call is either transcribed or has waited out the placeholder
/// grace period — the only two states in which it may be emitted.
fn ready_to_emit(call: &Call, now: i64) -> bool {
    !call.transcription.is_empty() || now - call.created_at >= PLACEHOLDER_WAIT_SECS
}

async fn classify_category(llm: &dyn LLMClient, transcription: &str) -> String {
    let prompt = format!(
        "Classify this radio call transcript into exactly one of these categories: {}.\n\
         Respond with only the category word, nothing else.\n\nTranscript: {transcription}",
        INCIDENT_CATEGORIES.join(", "),
    );
    let request = LLMRequest {
        model: String::new(),
        prompt,
        system: None,
        max_tokens: 8,
        temperature: 0.0,
    };
    match llm.generate(request).await {
        Ok(response) => {
            let word = response.content.trim().to_ascii_uppercase();
            INCIDENT_CATEGORIES
                .iter()
                .find(|c| word.contains(*c))
                .map(|c| c.to_string())
                .unwrap_or_else(|| "OTHER".to_string())
        }
        Err(e) => {
            tracing::warn!(error = %e, "category classification failed");
            "OTHER".to_string()
        }
    }
}

/// Map loop: calls with known coordinates, classified into an incident
/// category on first emission.
pub async fn run_map_loop(db: Database, llm: Arc<dyn LLMClient>, io: SocketIo, watermarks: Arc<Watermarks>) {
    let mut interval = tokio::time::interval(MAP_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = watermarks.notify.notified() => {}
        }

        let last_id = watermarks.map_last_id.load(Ordering::SeqCst);
        let batch = match calls::list_since(db.pool(), last_id, BATCH_CAP, true).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "map loop poll failed");
                continue;
            }
        };

        let now = Utc::now().timestamp();
        for call in batch {
            if !ready_to_emit(&call, now) {
                break;
            }

            let call = if call.category.is_none() && !call.transcription.is_empty() {
                let category = classify_category(llm.as_ref(), &call.transcription).await;
                if let Err(e) = calls::update_category(db.pool(), call.id, &category).await {
                    tracing::warn!(call_id = call.id, error = %e, "failed to persist category");
                }
                Call { category: Some(category), ..call }
            } else {
                call
            };

            let placeholder = call.transcription.is_empty();
            let payload = LivePayload::from_call(&call, placeholder);
            if let Err(e) = io.emit("newCall", &payload) {
                tracing::warn!(error = %e, "socket.io newCall emit failed");
            }
            watermarks.map_last_id.store(call.id, Ordering::SeqCst);
        }
    }
}

/// Feed loop: every new call regardless of location.
pub async fn run_feed_loop(db: Database, io: SocketIo, watermarks: Arc<Watermarks>) {
    let mut interval = tokio::time::interval(FEED_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = watermarks.notify.notified() => {}
        }

        let last_id = watermarks.feed_last_id.load(Ordering::SeqCst);
        let batch = match calls::list_since(db.pool(), last_id, BATCH_CAP, false).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "feed loop poll failed");
                continue;
            }
        };

        let now = Utc::now().timestamp();
        for call in batch {
            if !ready_to_emit(&call, now) {
                break;
            }
            let placeholder = call.transcription.is_empty();
            let payload = LivePayload::from_call(&call, placeholder);
            if let Err(e) = io.emit("liveFeedUpdate", &payload) {
                tracing::warn!(error = %e, "socket.io liveFeedUpdate emit failed");
            }
            watermarks.feed_last_id.store(call.id, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::calls::NewCall;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn ready_when_transcribed_regardless_of_age() {
        let call = Call {
            id: 1,
            talk_group_id: "101".into(),
            timestamp: 0,
            transcription: "hello".into(),
            audio_file_path: "a.mp3".into(),
            address: None,
            lat: None,
            lon: None,
            category: None,
            errors: 0,
            spikes: 0,
            source_id: None,
            created_at: 1000,
            audio_purged_at: None,
        };
        assert!(ready_to_emit(&call, 1000));
    }

    #[test]
    fn not_ready_before_placeholder_grace_period() {
        let call = Call {
            id: 1,
            talk_group_id: "101".into(),
            timestamp: 0,
            transcription: String::new(),
            audio_file_path: "a.mp3".into(),
            address: None,
            lat: None,
            lon: None,
            category: None,
            errors: 0,
            spikes: 0,
            source_id: None,
            created_at: 1000,
            audio_purged_at: None,
        };
        assert!(!ready_to_emit(&call, 1005));
        assert!(ready_to_emit(&call, 1010));
    }

    #[tokio::test]
    async fn watermark_advances_only_past_emitted_ids() {
        let pool = test_pool().await;
        let db = Database::from_pool(pool);

        for i in 0..2 {
            calls::insert(
                db.pool(),
                NewCall {
                    talk_group_id: "101",
                    timestamp: 1_700_000_000 + i,
                    audio_file_path: &format!("c{i}.mp3"),
                    errors: 0,
                    spikes: 0,
                    source_id: None,
                },
            )
            .await
            .unwrap();
        }

        let batch = calls::list_since(db.pool(), 0, BATCH_CAP, false).await.unwrap();
        assert_eq!(batch.len(), 2);
        let now = batch[0].created_at;
        assert!(!ready_to_emit(&batch[0], now), "freshly-inserted untranscribed call should not be ready yet");
    }
}
