//! Immutable process configuration, loaded once at startup from environment
//! variables and passed by reference everywhere else (Design Note:
//! "Process-wide env-var reads scattered across files").

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Local,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionMode {
    Local,
    Remote,
    Openai,
    Icad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Ollama,
    Openai,
}

/// Raw shape matched against environment variables via `envy`. Everything
/// that isn't a plain scalar (the mapped-talkgroup town table, the target
/// county set) is parsed out of its comma/prefix-delimited env-var form in
/// [`Config::from_env`].
#[derive(Debug, Deserialize)]
struct RawConfig {
    bot_port: Option<u16>,
    public_domain: Option<String>,
    api_key_file: Option<String>,
    database_url: Option<String>,
    storage_mode: Option<StorageMode>,
    s3_endpoint: Option<String>,
    s3_bucket: Option<String>,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    s3_region: Option<String>,
    audio_dir: Option<String>,
    audio_retention_days: Option<u32>,

    transcription_mode: Option<TranscriptionMode>,
    local_asr_command: Option<String>,
    faster_whisper_server_url: Option<String>,
    whisper_model: Option<String>,
    transcription_device: Option<String>,
    icad_url: Option<String>,
    icad_api_key: Option<String>,
    icad_profile: Option<String>,
    openai_api_key: Option<String>,
    max_concurrent_transcriptions: Option<usize>,

    mapped_talk_groups: Option<String>,
    geocoding_state: Option<String>,
    geocoding_country: Option<String>,
    geocoding_target_counties: Option<String>,
    geocoding_city: Option<String>,
    ai_provider: Option<AiProvider>,
    ollama_url: Option<String>,
    ollama_model: Option<String>,
    openai_model: Option<String>,
    google_maps_api_key: Option<String>,
    locationiq_api_key: Option<String>,

    discord_token: Option<String>,
    summary_lookback_hours: Option<u32>,
    ask_ai_lookback_hours: Option<u32>,
    timezone: Option<String>,
}

/// Fully-resolved process configuration. Cheap to clone; intended to live
/// behind a single `Arc<Config>` shared by every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_port: u16,
    pub public_domain: String,
    pub api_key_file: String,
    pub database_url: String,

    pub storage_mode: StorageMode,
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_region: String,
    pub audio_dir: String,
    pub audio_retention_days: u32,

    pub transcription_mode: TranscriptionMode,
    pub local_asr_command: Option<String>,
    pub faster_whisper_server_url: Option<String>,
    pub whisper_model: Option<String>,
    pub transcription_device: Option<String>,
    pub icad_url: Option<String>,
    pub icad_api_key: Option<String>,
    pub icad_profile: Option<String>,
    pub openai_api_key: Option<String>,
    pub max_concurrent_transcriptions: usize,

    /// talkgroup id -> associated town, for mapped (extraction-eligible)
    /// talkgroups. Keys of this map are exactly `MAPPED_TALK_GROUPS`.
    pub mapped_talkgroups: HashMap<String, String>,
    pub geocoding_state: String,
    pub geocoding_country: String,
    pub geocoding_target_counties: Vec<String>,
    pub geocoding_city: Option<String>,
    pub ai_provider: AiProvider,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_model: String,
    pub google_maps_api_key: Option<String>,
    pub locationiq_api_key: Option<String>,

    pub discord_token: Option<String>,
    pub summary_lookback_hours: u32,
    pub ask_ai_lookback_hours: u32,
    pub timezone: String,
}

impl Config {
    /// Load and validate configuration from the process environment.
    /// Called exactly once, from `main`, before any component starts.
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::from_env()
            .map_err(|e| Error::Configuration(format!("failed to parse environment: {e}")))?;

        let storage_mode = raw.storage_mode.unwrap_or(StorageMode::Local);
        if storage_mode == StorageMode::S3
            && (raw.s3_endpoint.is_none() || raw.s3_bucket.is_none())
        {
            return Err(Error::Configuration(
                "STORAGE_MODE=s3 requires S3_ENDPOINT and S3_BUCKET".into(),
            ));
        }

        let transcription_mode = raw.transcription_mode.unwrap_or(TranscriptionMode::Local);

        let mapped_ids: Vec<String> = raw
            .mapped_talk_groups
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut mapped_talkgroups = HashMap::new();
        for id in &mapped_ids {
            let env_name = format!("TALK_GROUP_{id}");
            if let Ok(town) = std::env::var(&env_name) {
                mapped_talkgroups.insert(id.clone(), town);
            } else {
                tracing::warn!(talkgroup = %id, "mapped talkgroup has no TALK_GROUP_<id> town configured");
                mapped_talkgroups.insert(id.clone(), String::new());
            }
        }

        let geocoding_target_counties = raw
            .geocoding_target_counties
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bot_port: raw.bot_port.unwrap_or(3000),
            public_domain: raw.public_domain.unwrap_or_else(|| "localhost".to_string()),
            api_key_file: raw.api_key_file.unwrap_or_else(|| "api_keys.json".to_string()),
            database_url: raw
                .database_url
                .unwrap_or_else(|| "sqlite://callrelay.db".to_string()),

            storage_mode,
            s3_endpoint: raw.s3_endpoint,
            s3_bucket: raw.s3_bucket,
            s3_access_key: raw.s3_access_key,
            s3_secret_key: raw.s3_secret_key,
            s3_region: raw.s3_region.unwrap_or_else(|| "auto".to_string()),
            audio_dir: raw.audio_dir.unwrap_or_else(|| "audio".to_string()),
            audio_retention_days: raw.audio_retention_days.unwrap_or(7),

            transcription_mode,
            local_asr_command: raw.local_asr_command,
            faster_whisper_server_url: raw.faster_whisper_server_url,
            whisper_model: raw.whisper_model,
            transcription_device: raw.transcription_device,
            icad_url: raw.icad_url,
            icad_api_key: raw.icad_api_key,
            icad_profile: raw.icad_profile,
            openai_api_key: raw.openai_api_key,
            max_concurrent_transcriptions: raw.max_concurrent_transcriptions.unwrap_or(3),

            mapped_talkgroups,
            geocoding_state: raw.geocoding_state.unwrap_or_default(),
            geocoding_country: raw.geocoding_country.unwrap_or_else(|| "US".to_string()),
            geocoding_target_counties,
            geocoding_city: raw.geocoding_city,
            ai_provider: raw.ai_provider.unwrap_or(AiProvider::Ollama),
            ollama_url: raw.ollama_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_model: raw.ollama_model.unwrap_or_else(|| "llama3".to_string()),
            openai_model: raw.openai_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            google_maps_api_key: raw.google_maps_api_key,
            locationiq_api_key: raw.locationiq_api_key,

            discord_token: raw.discord_token,
            summary_lookback_hours: raw.summary_lookback_hours.unwrap_or(1),
            ask_ai_lookback_hours: raw.ask_ai_lookback_hours.unwrap_or(8),
            timezone: raw.timezone.unwrap_or_else(|| "UTC".to_string()),
        })
    }

    /// True if `talkgroup_id` is eligible for address extraction.
    pub fn is_mapped_talkgroup(&self, talkgroup_id: &str) -> bool {
        self.mapped_talkgroups.contains_key(talkgroup_id)
    }

    /// A fully-populated `Config` for unit tests elsewhere in the crate,
    /// bypassing `from_env` (and its process-wide env var races) entirely.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            bot_port: 3000,
            public_domain: "localhost".into(),
            api_key_file: "api_keys.json".into(),
            database_url: "sqlite::memory:".into(),
            storage_mode: StorageMode::Local,
            s3_endpoint: None,
            s3_bucket: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_region: "auto".into(),
            audio_dir: "audio".into(),
            audio_retention_days: 7,
            transcription_mode: TranscriptionMode::Local,
            local_asr_command: None,
            faster_whisper_server_url: None,
            whisper_model: None,
            transcription_device: None,
            icad_url: None,
            icad_api_key: None,
            icad_profile: None,
            openai_api_key: None,
            max_concurrent_transcriptions: 3,
            mapped_talkgroups: HashMap::new(),
            geocoding_state: "NY".into(),
            geocoding_country: "US".into(),
            geocoding_target_counties: Vec::new(),
            geocoding_city: None,
            ai_provider: AiProvider::Ollama,
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "llama3".into(),
            openai_model: "gpt-4o-mini".into(),
            google_maps_api_key: None,
            locationiq_api_key: None,
            discord_token: None,
            summary_lookback_hours: 1,
            ask_ai_lookback_hours: 8,
            timezone: "UTC".into(),
        }
    }

    pub fn town_for_talkgroup(&self, talkgroup_id: &str) -> Option<&str> {
        self.mapped_talkgroups.get(talkgroup_id).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (k, _) in std::env::vars() {
            if k.starts_with("TALK_GROUP_")
                || matches!(
                    k.as_str(),
                    "MAPPED_TALK_GROUPS"
                        | "STORAGE_MODE"
                        | "S3_ENDPOINT"
                        | "S3_BUCKET"
                        | "GEOCODING_TARGET_COUNTIES"
                )
            {
                std::env::remove_var(k);
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_to_local_storage() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.storage_mode, StorageMode::Local);
        assert_eq!(config.max_concurrent_transcriptions, 3);
    }

    #[test]
    #[serial]
    fn s3_mode_requires_endpoint_and_bucket() {
        clear_env();
        std::env::set_var("STORAGE_MODE", "s3");
        let result = Config::from_env();
        assert!(result.is_err());
        std::env::remove_var("STORAGE_MODE");
    }

    #[test]
    #[serial]
    fn mapped_talkgroups_parsed_from_csv_and_prefixed_vars() {
        clear_env();
        std::env::set_var("MAPPED_TALK_GROUPS", "101,202");
        std::env::set_var("TALK_GROUP_101", "Springfield");
        let config = Config::from_env().unwrap();
        assert!(config.is_mapped_talkgroup("101"));
        assert_eq!(config.town_for_talkgroup("101"), Some("Springfield"));
        assert!(config.is_mapped_talkgroup("202"));
        std::env::remove_var("MAPPED_TALK_GROUPS");
        std::env::remove_var("TALK_GROUP_101");
    }

    #[test]
    #[serial]
    fn target_counties_parsed_from_csv() {
        clear_env();
        std::env::set_var("GEOCODING_TARGET_COUNTIES", "Rockland, Bergen ,Essex");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.geocoding_target_counties,
            vec!["Rockland", "Bergen", "Essex"]
        );
        std::env::remove_var("GEOCODING_TARGET_COUNTIES");
    }
}
