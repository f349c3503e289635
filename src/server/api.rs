//! REST API handlers for the web/map client (spec §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::database::{audio_files, calls, talkgroups};

use super::AppState;

#[derive(Deserialize)]
pub struct HoursQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    1
}

/// `GET /api/calls?hours=H`
pub async fn list_calls(State(state): State<AppState>, Query(q): Query<HoursQuery>) -> impl IntoResponse {
    match calls::list_recent_with_coords(state.pipeline.db.pool(), q.hours).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "list_calls failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /api/call/:id/details`
pub async fn call_details(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match calls::get(state.pipeline.db.pool(), id).await {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "call_details failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct SkipQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// `GET /api/additional-transcriptions/:callId?skip=K`
pub async fn additional_transcriptions(
    State(state): State<AppState>,
    Path(call_id): Path<i64>,
    Query(q): Query<SkipQuery>,
) -> impl IntoResponse {
    match calls::additional_transcriptions(state.pipeline.db.pool(), call_id, q.skip, q.limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "additional_transcriptions failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct TalkgroupCallsQuery {
    #[serde(default, rename = "sinceId")]
    pub since_id: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// `GET /api/talkgroup/:id/calls?sinceId&limit&offset`
pub async fn talkgroup_calls(
    State(state): State<AppState>,
    Path(talk_group_id): Path<String>,
    Query(q): Query<TalkgroupCallsQuery>,
) -> impl IntoResponse {
    match calls::list_for_talkgroup(state.pipeline.db.pool(), &talk_group_id, q.since_id, q.limit, q.offset).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "talkgroup_calls failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /api/talkgroups`
pub async fn list_talkgroups(State(state): State<AppState>) -> impl IntoResponse {
    match talkgroups::list_all(state.pipeline.db.pool()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "list_talkgroups failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct MarkerLocation {
    pub lat: f64,
    pub lon: f64,
}

/// `PUT /api/markers/:id/location` — admin-only coordinate override.
pub async fn set_marker_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MarkerLocation>,
) -> impl IntoResponse {
    match calls::set_marker_location(state.pipeline.db.pool(), id, body.lat, body.lon).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "set_marker_location failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `DELETE /api/markers/:id`
pub async fn clear_marker(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match calls::clear_marker(state.pipeline.db.pool(), id).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "clear_marker failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize, serde::Serialize)]
pub struct CorrectionLogEntry {
    pub call_id: i64,
    pub field: String,
    pub previous_value: Option<String>,
    pub corrected_value: String,
}

#[derive(Deserialize, serde::Serialize)]
pub struct DeletionLogEntry {
    pub call_id: i64,
    pub reason: Option<String>,
}

/// `POST /api/log/correction` — append-only JSON-lines log (spec §3
/// `CorrectionLogEntry`, supplemental to the distilled spec).
pub async fn log_correction(
    State(state): State<AppState>,
    Json(entry): Json<CorrectionLogEntry>,
) -> impl IntoResponse {
    append_log_line(&state.logs_dir, "corrections.jsonl", &entry).await
}

/// `POST /api/log/deletion`
pub async fn log_deletion(State(state): State<AppState>, Json(entry): Json<DeletionLogEntry>) -> impl IntoResponse {
    append_log_line(&state.logs_dir, "deletions.jsonl", &entry).await
}

async fn append_log_line(dir: &str, filename: &str, entry: &impl serde::Serialize) -> StatusCode {
    let Ok(line) = serde_json::to_string(entry) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::error!(error = %e, "failed to create log directory");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let path = format!("{dir}/{filename}");
    use tokio::io::AsyncWriteExt;
    let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await;
    match file {
        Ok(mut f) => {
            if f.write_all(format!("{line}\n").as_bytes()).await.is_ok() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open log file");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /audio/:id` — content-type follows the stored extension (spec §6).
pub async fn get_audio(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let call = match calls::get(state.pipeline.db.pool(), id).await {
        Ok(Some(call)) => call,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "get_audio lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let bytes = match state.storage.download(&call.audio_file_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, call_id = id, "object store read failed; trying legacy blob fallback");
            match audio_files::get(state.pipeline.db.pool(), id).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return StatusCode::NOT_FOUND.into_response(),
                Err(e) => {
                    tracing::error!(error = %e, call_id = id, "legacy blob fallback lookup failed");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
    };

    let content_type = if call.audio_file_path.ends_with(".m4a") {
        "audio/mp4"
    } else {
        "audio/mpeg"
    };

    ([(axum::http::header::CONTENT_TYPE, content_type)], bytes).into_response()
}
