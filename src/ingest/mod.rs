//! Call-upload ingestion endpoint (spec §4.1): `POST /api/call-upload`.
//!
//! Parses whichever upstream dialect sent the request, validates the
//! presented API key, persists the audio blob and the `Call` row, then hands
//! the rest of the work off to the [`crate::pipeline::Pipeline`] as a
//! detached task so the uploader gets its `200` back immediately once
//! storage and the database agree the call exists.

pub mod dialect;
pub mod filename;

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;

use crate::config::TranscriptionMode;
use crate::database::calls::{self, NewCall};
use crate::database::talkgroups;
use crate::server::AppState;
use crate::transcription::AudioRef;

use dialect::RawFields;

/// `POST /api/call-upload`. Always responds `200 text/plain` on anything
/// that reached the dialect parser successfully — including the SDRTrunk
/// `test=1` health probe and `.pcm` discards — and only a 4xx/5xx for
/// genuinely malformed/unauthenticated/unavailable cases (spec §7: only
/// `UploadMalformed`, `AuthFailed`, `StorageUnavailable` surface here).
pub async fn handle_call_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    tracing::debug!(sdrtrunk = dialect::is_sdrtrunk_user_agent(user_agent), "upload dialect");

    let mut fields = RawFields::default();
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut presented_key: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("upload malformed: {e}")).into_response();
            }
        };

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "key" | "api_key" => presented_key = field.text().await.ok(),
            "talkgroup" | "talkgroupId" => fields.talkgroup = field.text().await.ok(),
            "talkgroupLabel" => fields.talkgroup_label = field.text().await.ok(),
            "systemLabel" | "system" => fields.system_label = field.text().await.ok(),
            "talkgroupGroup" => fields.talkgroup_group = field.text().await.ok(),
            "dateTime" | "timestamp" => fields.date_time = field.text().await.ok(),
            "source" => fields.source = field.text().await.ok(),
            "sources" => fields.sources = field.text().await.ok(),
            "frequencies" => fields.frequencies = field.text().await.ok(),
            "test" => fields.test = field.text().await.ok(),
            "audio" | "file" | "audioFile" => {
                filename = field.file_name().map(|s| s.to_string());
                audio_bytes = field.bytes().await.ok().map(|b| b.to_vec());
            }
            other => {
                tracing::debug!(field = other, "ignoring unrecognized upload field");
            }
        }
    }

    // SDRTrunk health probe: never reaches storage (spec §4.1), and gated on
    // the SDRTrunk user agent so a non-SDRTrunk upload that happens to carry
    // a `test` field still goes through normal validation instead of being
    // silently accepted. SDRTrunk itself only checks for a 200, but the
    // response text is pinned to what it would say about a real upload
    // missing a talkgroup, since that's what every other field on the probe
    // request looks like.
    if dialect::is_test_probe(&fields, user_agent) {
        return (StatusCode::OK, "incomplete call data: no talkgroup").into_response();
    }

    let Some(presented_key) = presented_key else {
        return (StatusCode::UNAUTHORIZED, "missing API key").into_response();
    };
    if !state.api_keys.validate(&presented_key) {
        return (StatusCode::UNAUTHORIZED, "invalid API key").into_response();
    }

    let Some(filename) = filename else {
        return (StatusCode::BAD_REQUEST, "upload malformed: missing audio file").into_response();
    };

    // `.pcm` uploads are silently discarded, never stored (spec §4.1).
    if filename::extension_of(&filename) == "pcm" {
        return (StatusCode::OK, "Call imported successfully.").into_response();
    }

    let Some(audio_bytes) = audio_bytes else {
        return (StatusCode::BAD_REQUEST, "upload malformed: empty audio file").into_response();
    };
    let Some(talkgroup) = fields.talkgroup.clone() else {
        return (StatusCode::BAD_REQUEST, "upload malformed: missing talkgroup").into_response();
    };

    let now = Utc::now().timestamp();
    let timestamp = fields
        .date_time
        .as_deref()
        .map(|raw| dialect::parse_date_time(raw, now))
        .unwrap_or(now);
    let source = dialect::resolve_source(&fields, Some(&filename));
    let signal = fields
        .frequencies
        .as_deref()
        .and_then(dialect::signal_quality_from_frequencies);

    let key_parts = filename::AudioKeyParts {
        timestamp,
        system: fields.system_label.clone().unwrap_or_else(|| "0".to_string()),
        talkgroup: talkgroup.clone(),
        source: source.clone().unwrap_or_else(|| "0".to_string()),
        extension: filename::extension_of(&filename),
    };
    let audio_key = filename::generate(&key_parts);

    if let Err(e) = state.storage.upload(&audio_key, audio_bytes.clone()).await {
        tracing::error!(error = %e, "audio upload failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response();
    }

    if let Err(e) = talkgroups::upsert_seen(
        state.pipeline.db.pool(),
        &talkgroup,
        fields.talkgroup_label.as_deref().unwrap_or(&talkgroup),
        fields.talkgroup_group.as_deref().unwrap_or(""),
    )
    .await
    {
        tracing::warn!(error = %e, talkgroup, "failed to upsert talkgroup; continuing anyway");
    }

    let call_id = match calls::insert(
        state.pipeline.db.pool(),
        NewCall {
            talk_group_id: &talkgroup,
            timestamp,
            audio_file_path: &audio_key,
            errors: signal.as_ref().map(|s| s.errors).unwrap_or(0),
            spikes: signal.as_ref().map(|s| s.spikes).unwrap_or(0),
            source_id: source.as_deref(),
        },
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "call insert failed; rolling back uploaded audio");
            if let Err(e) = state.storage.delete(&audio_key).await {
                tracing::warn!(error = %e, "rollback delete of orphaned audio also failed");
            }
            return (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response();
        }
    };

    // Only the Local ASR engine runs on this machine and can read the
    // object/file store's own filesystem directly; every other engine
    // (Remote, OpenAI, ICAD) is an external service, so it always gets
    // bytes regardless of storage mode (spec §4.2 selection rule).
    let audio_ref = if state.pipeline.config.transcription_mode == TranscriptionMode::Local {
        match state.storage.local_path(&audio_key) {
            Some(path) => AudioRef::Path(path),
            None => AudioRef::Bytes(audio_bytes),
        }
    } else {
        AudioRef::Bytes(audio_bytes)
    };

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.process(call_id, audio_ref).await;
    });

    (StatusCode::OK, "Call imported successfully.").into_response()
}
