//! End-to-end boundary scenarios (spec §8): the SDRTrunk health probe, PCM
//! silent-discard, and out-of-region geocode rejection, each driven through
//! the real HTTP router or the real `Pipeline` rather than a single module's
//! unit tests. Concurrent-transcription-ordering, coalescer-overflow, and
//! child-death scenarios have their own close analogues next to the code
//! they exercise (`transcription::queue`, `transcription::local`,
//! `fanout::discord`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::ServiceExt;

use callrelay::auth::{self, ApiKeyStore};
use callrelay::config::Config;
use callrelay::database::{calls, Database};
use callrelay::error::Result;
use callrelay::extractor::geocode::{GeocodeProvider, GeocodeResult};
use callrelay::fanout::discord::{DiscordSender, FanoutState};
use callrelay::fanout::live::Watermarks;
use callrelay::llm::{LLMClient, LLMRequest, LLMResponse};
use callrelay::pipeline::Pipeline;
use callrelay::server::{self, AppState};
use callrelay::storage::Storage;
use callrelay::transcription::queue::TranscriptionQueue;
use callrelay::transcription::{AudioRef, TranscriptionEngine};
use serenity::all::{ChannelId, MessageId};

const BOUNDARY: &str = "boundary-scenarios-fixture";

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Never actually called by either boundary test below (the test probe and
/// the `.pcm` discard both return before the pipeline is reached), but the
/// type has to exist to build a real `Pipeline`.
struct UnusedTranscriptionEngine;

#[async_trait]
impl TranscriptionEngine for UnusedTranscriptionEngine {
    async fn transcribe(&self, _audio: AudioRef) -> Result<String> {
        panic!("transcription engine should not be invoked by this scenario");
    }
}

struct UnusedLlmClient;

#[async_trait]
impl LLMClient for UnusedLlmClient {
    async fn generate(&self, _request: LLMRequest) -> Result<LLMResponse> {
        panic!("LLM client should not be invoked by this scenario");
    }
}

struct UnusedGeocoder;

#[async_trait]
impl GeocodeProvider for UnusedGeocoder {
    async fn geocode(&self, _address: &str, _config: &Config) -> Result<Option<GeocodeResult>> {
        panic!("geocoder should not be invoked by this scenario");
    }
}

struct NoopSender;

#[async_trait]
impl DiscordSender for NoopSender {
    async fn ensure_channel(&self, _category: &str, _name: &str) -> Result<ChannelId> {
        Ok(ChannelId::new(1))
    }
    async fn send_message(&self, _channel_id: ChannelId, _talk_group_id: &str, _body: &str) -> Result<(MessageId, String)> {
        Ok((MessageId::new(1), "https://discord.com/channels/1/1/1".to_string()))
    }
    async fn edit_message(&self, _channel_id: ChannelId, _message_id: MessageId, _talk_group_id: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}

async fn test_state(db: Database, storage: Storage, api_key_file: std::path::PathBuf) -> AppState {
    let api_keys = Arc::new(ApiKeyStore::load(&api_key_file).await.unwrap());
    let config = Arc::new(Config::for_test());
    let transcription = Arc::new(TranscriptionQueue::new(Arc::new(UnusedTranscriptionEngine), 1));
    let llm: Arc<dyn LLMClient> = Arc::new(UnusedLlmClient);
    let geocoder: Arc<dyn GeocodeProvider> = Arc::new(UnusedGeocoder);
    let sender: Arc<dyn DiscordSender> = Arc::new(NoopSender);
    let fanout = Arc::new(FanoutState::new(db.clone(), sender, config.public_domain.clone()));
    let watermarks = Arc::new(Watermarks::new());

    let pipeline = Arc::new(Pipeline {
        db,
        config,
        transcription,
        llm,
        geocoder,
        fanout,
        watermarks,
    });

    AppState {
        storage,
        api_keys,
        pipeline,
        logs_dir: "logs".to_string(),
    }
}

fn multipart_body(parts: &[(&str, &str)]) -> Body {
    let mut body = String::new();
    for (name, value) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        body.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"));
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn multipart_body_with_file(parts: &[(&str, &str)], file_field: &str, filename: &str, file_bytes: &[u8]) -> Body {
    let mut body = Vec::new();
    for (name, value) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{file_field}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

#[tokio::test]
async fn sdrtrunk_health_probe_is_never_persisted() {
    let pool = test_pool().await;
    let db = Database::from_pool(pool.clone());
    let audio_dir = tempfile::tempdir().unwrap();
    let storage = Storage::local(audio_dir.path().to_str().unwrap().to_string()).unwrap();
    storage.initialize().await.unwrap();
    let key_file = tempfile::NamedTempFile::new().unwrap();
    let state = test_state(db, storage, key_file.path().to_path_buf()).await;
    let (router, _io) = server::build(state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/call-upload")
        .header("User-Agent", "sdrtrunk")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart_body(&[("test", "1")]))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let remaining = calls::list_since(&pool, 0, 100, false).await.unwrap();
    assert!(remaining.is_empty(), "health probe must not persist a Call row");

    let files = tokio::fs::read_dir(audio_dir.path()).await.unwrap();
    let mut files = files;
    assert!(files.next_entry().await.unwrap().is_none(), "health probe must not write an audio file");
}

#[tokio::test]
async fn pcm_upload_is_silently_discarded() {
    let pool = test_pool().await;
    let db = Database::from_pool(pool.clone());
    let audio_dir = tempfile::tempdir().unwrap();
    let storage = Storage::local(audio_dir.path().to_str().unwrap().to_string()).unwrap();
    storage.initialize().await.unwrap();

    let key_file = tempfile::NamedTempFile::new().unwrap();
    let hash = auth::hash_key("test-key").unwrap();
    tokio::fs::write(
        key_file.path(),
        serde_json::to_vec(&vec![auth::StoredKey { key: hash, disabled: false }]).unwrap(),
    )
    .await
    .unwrap();

    let state = test_state(db, storage, key_file.path().to_path_buf()).await;
    let (router, _io) = server::build(state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/call-upload")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart_body_with_file(
            &[("key", "test-key"), ("talkgroup", "101")],
            "audio",
            "x.pcm",
            b"raw pcm samples",
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let remaining = calls::list_since(&pool, 0, 100, false).await.unwrap();
    assert!(remaining.is_empty(), ".pcm upload must not persist a Call row");
}

/// An LLM stand-in that always answers with the one address baked into the
/// transcript it's asked about.
struct FixedAddressLlm {
    address: String,
}

#[async_trait]
impl LLMClient for FixedAddressLlm {
    async fn generate(&self, _request: LLMRequest) -> Result<LLMResponse> {
        Ok(LLMResponse {
            content: self.address.clone(),
            model: "fixed".to_string(),
        })
    }
}

/// A geocoder that resolves every address to a county outside the
/// configured target set, so `extractor::extract_and_geocode` rejects it.
struct OutOfRegionGeocoder;

#[async_trait]
impl GeocodeProvider for OutOfRegionGeocoder {
    async fn geocode(&self, address: &str, _config: &Config) -> Result<Option<GeocodeResult>> {
        Ok(Some(GeocodeResult {
            formatted_address: format!("{address}, Otherville, NY"),
            lat: 41.2,
            lon: -74.3,
            county: Some("Otherville".to_string()),
            has_street_number: true,
            is_bare_postcode_row: false,
        }))
    }
}

struct RecordingSender {
    sent: tokio::sync::Mutex<Vec<String>>,
    next_id: AtomicU64,
}

#[async_trait]
impl DiscordSender for RecordingSender {
    async fn ensure_channel(&self, _category: &str, _name: &str) -> Result<ChannelId> {
        Ok(ChannelId::new(7))
    }
    async fn send_message(&self, _channel_id: ChannelId, _talk_group_id: &str, body: &str) -> Result<(MessageId, String)> {
        self.sent.lock().await.push(body.to_string());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok((MessageId::new(id), format!("https://discord.com/channels/1/7/{id}")))
    }
    async fn edit_message(&self, _channel_id: ChannelId, _message_id: MessageId, _talk_group_id: &str, body: &str) -> Result<()> {
        self.sent.lock().await.push(body.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn geocode_out_of_region_persists_call_without_coordinates_but_still_fans_out() {
    let pool = test_pool().await;
    let db = Database::from_pool(pool.clone());

    callrelay::database::talkgroups::upsert_seen(&pool, "101", "PD Dispatch", "Police").await.unwrap();

    let mut mapped = std::collections::HashMap::new();
    mapped.insert("101".to_string(), "Springfield".to_string());
    let config = Arc::new(Config {
        mapped_talkgroups: mapped,
        geocoding_target_counties: vec!["Rockland".to_string()],
        ..Config::for_test()
    });

    let transcription = Arc::new(TranscriptionQueue::new(
        Arc::new(FixedTranscriptEngine {
            text: "fire at 123 Main St, Otherville".to_string(),
        }),
        1,
    ));
    let llm: Arc<dyn LLMClient> = Arc::new(FixedAddressLlm {
        address: "123 Main St, Otherville".to_string(),
    });
    let geocoder: Arc<dyn GeocodeProvider> = Arc::new(OutOfRegionGeocoder);
    let sender = Arc::new(RecordingSender {
        sent: tokio::sync::Mutex::new(Vec::new()),
        next_id: AtomicU64::new(1),
    });
    let fanout = Arc::new(FanoutState::new(db.clone(), sender.clone(), config.public_domain.clone()));
    let watermarks = Arc::new(Watermarks::new());

    let pipeline = Pipeline {
        db: db.clone(),
        config,
        transcription,
        llm,
        geocoder,
        fanout,
        watermarks,
    };

    let call_id = calls::insert(
        &pool,
        calls::NewCall {
            talk_group_id: "101",
            timestamp: 1_700_000_000,
            audio_file_path: "call_1.mp3",
            errors: 0,
            spikes: 0,
            source_id: Some("555"),
        },
    )
    .await
    .unwrap();

    pipeline.process(call_id, AudioRef::Bytes(b"irrelevant".to_vec())).await;

    let call = calls::get(&pool, call_id).await.unwrap().unwrap();
    assert!(call.address.is_none(), "out-of-region match must not persist an address");
    assert!(call.lat.is_none());
    assert!(call.lon.is_none());
    assert_eq!(call.transcription, "fire at 123 Main St, Otherville");

    let sent = sender.sent.lock().await;
    assert_eq!(sent.len(), 1, "Discord line must still be posted even without coordinates");
    assert!(sent[0].contains("fire at 123 Main St"));
}

struct FixedTranscriptEngine {
    text: String,
}

#[async_trait]
impl TranscriptionEngine for FixedTranscriptEngine {
    async fn transcribe(&self, _audio: AudioRef) -> Result<String> {
        Ok(self.text.clone())
    }
}
