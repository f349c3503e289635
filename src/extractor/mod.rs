//! Address extraction + geocoding (spec §4.3).
//!
//! `extract_and_geocode` is the orchestrator: it gates on talkgroup mapping
//! and transcript length, prompts the shared `llm::Client`, runs the
//! transcript through [`normalize::normalize_address`], then hands the
//! result to a [`geocode::GeocodeProvider`]. Every failure mode is absorbed
//! locally — the caller always gets `Ok(None)` rather than an error when
//! extraction doesn't produce coordinates, matching the `ExtractionSkipped`
//! / `GeocodeRejected` recovery policy in the error taxonomy.

pub mod geocode;
pub mod normalize;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::llm::{LLMClient, LLMRequest};

/// The literal string the extraction prompt forces the model to emit when no
/// address is present.
pub const SENTINEL: &str = "No address found";

const MIN_TRANSCRIPT_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedLocation {
    pub raw_address: String,
    pub formatted_address: String,
    pub lat: f64,
    pub lon: f64,
}

fn build_prompt(transcript: &str, town: &str) -> LLMRequest {
    LLMRequest {
        model: String::new(),
        prompt: format!(
            "Transcript: \"{transcript}\"\nTown: {town}\n\n\
             If this transcript mentions a specific street address, respond with that \
             address on a single line and nothing else. If it does not mention a specific \
             street address, respond with exactly: {SENTINEL}"
        ),
        max_tokens: 128,
        temperature: 0.0,
        system: Some(
            "You extract street addresses from emergency-dispatch radio transcripts. \
             Respond with exactly one line: either the address, or the sentinel."
                .to_string(),
        ),
    }
}

/// Run extraction + geocoding for one call's transcript. Returns `None` for
/// every skip/rejection reason named in spec §4.3/§7 — never an `Err` for
/// those, since they are recoverable-locally outcomes, not failures.
pub async fn extract_and_geocode(
    config: &Config,
    llm: &Arc<dyn LLMClient>,
    geocoder: &dyn geocode::GeocodeProvider,
    talk_group_id: &str,
    transcript: &str,
) -> Result<Option<ExtractedLocation>> {
    if !config.is_mapped_talkgroup(talk_group_id) {
        return Ok(None);
    }
    if transcript.len() < MIN_TRANSCRIPT_LEN {
        return Ok(None);
    }
    let town = config.town_for_talkgroup(talk_group_id).unwrap_or_default();

    let response = match llm.generate(build_prompt(transcript, town)).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, talk_group_id, "address extraction LLM call failed");
            return Ok(None);
        }
    };

    let Some(normalized) = normalize::normalize_address(&response.content, &config.geocoding_state)
    else {
        return Ok(None);
    };

    match geocoder.geocode(&normalized, config).await {
        Ok(Some(result)) => Ok(Some(ExtractedLocation {
            raw_address: normalized,
            formatted_address: result.formatted_address,
            lat: result.lat,
            lon: result.lon,
        })),
        Ok(None) => Ok(None),
        Err(e) => {
            tracing::warn!(error = %e, talk_group_id, "geocoding failed");
            Ok(None)
        }
    }
}
