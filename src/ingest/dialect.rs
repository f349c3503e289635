//! Upstream dialect parsing (spec §4.1): SDRTrunk vs TrunkRecorder /
//! rdio-scanner, dispatched on `User-Agent` and, for `dateTime`, on whether
//! the value parses as a large Unix-seconds integer or as ISO-8601.

use std::collections::HashMap;

use chrono::DateTime;
use serde::Deserialize;

/// Parsed (but not yet validated) multipart fields, before file bytes are
/// attached. Unknown field names are simply never inserted here — the
/// multipart loop ignores them rather than rejecting the request.
#[derive(Debug, Default, Clone)]
pub struct RawFields {
    pub key: Option<String>,
    pub talkgroup: Option<String>,
    pub talkgroup_label: Option<String>,
    pub system_label: Option<String>,
    pub talkgroup_group: Option<String>,
    pub date_time: Option<String>,
    pub source: Option<String>,
    pub sources: Option<String>,
    pub frequencies: Option<String>,
    pub test: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalQuality {
    pub errors: i64,
    pub spikes: i64,
}

#[derive(Deserialize)]
struct SourceEntry {
    src: i64,
}

#[derive(Deserialize)]
struct FrequencyEntry {
    #[serde(default, rename = "errorCount")]
    error_count: i64,
    #[serde(default, rename = "spikeCount")]
    spike_count: i64,
}

pub fn is_sdrtrunk_user_agent(user_agent: Option<&str>) -> bool {
    user_agent
        .map(|ua| ua.to_ascii_lowercase().contains("sdrtrunk"))
        .unwrap_or(false)
}

/// `[0].src` out of a JSON array in the `sources` field (TrunkRecorder /
/// rdio-scanner).
pub fn source_from_sources_field(sources_json: &str) -> Option<String> {
    let entries: Vec<SourceEntry> = serde_json::from_str(sources_json).ok()?;
    entries.first().map(|e| e.src.to_string())
}

/// Sum `errorCount`/`spikeCount` across the `frequencies` JSON array into a
/// single signal-quality pair.
pub fn signal_quality_from_frequencies(frequencies_json: &str) -> Option<SignalQuality> {
    let entries: Vec<FrequencyEntry> = serde_json::from_str(frequencies_json).ok()?;
    if entries.is_empty() {
        return None;
    }
    let (errors, spikes) = entries
        .iter()
        .fold((0i64, 0i64), |(e, s), entry| (e + entry.error_count, s + entry.spike_count));
    Some(SignalQuality { errors, spikes })
}

/// Dialect detection for `dateTime` (spec §4.1): a large Unix-seconds
/// integer is TrunkRecorder; otherwise try ISO-8601 (rdio-scanner); if both
/// fail, the caller falls back to ingestion time.
pub fn parse_date_time(raw: &str, now: i64) -> i64 {
    if let Ok(n) = raw.parse::<i64>() {
        if n > 1_000_000_000 {
            return n;
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.timestamp();
    }
    tracing::warn!(raw, "dateTime field unparseable in either dialect; using ingestion time");
    now
}

/// Resolve the source unit ID: prefer the explicit `source`/`sources`
/// fields; SDRTrunk uploads often only carry it embedded in the filename.
pub fn resolve_source(fields: &RawFields, filename: Option<&str>) -> Option<String> {
    if let Some(source) = &fields.source {
        return Some(source.clone());
    }
    if let Some(sources) = &fields.sources {
        if let Some(src) = source_from_sources_field(sources) {
            return Some(src);
        }
    }
    filename.and_then(super::filename::parse_source_from_filename)
}

/// The `test=1` health probe is an SDRTrunk-only convention (its connection
/// test posts nothing else); other dialects that happen to send a `test`
/// field still go through normal validation.
pub fn is_test_probe(fields: &RawFields, user_agent: Option<&str>) -> bool {
    is_sdrtrunk_user_agent(user_agent) && fields.test.as_deref() == Some("1")
}

#[allow(dead_code)]
pub type FieldMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdrtrunk_ua_detected_case_insensitively() {
        assert!(is_sdrtrunk_user_agent(Some("SDRTrunk/1.2")));
        assert!(!is_sdrtrunk_user_agent(Some("rdio-scanner")));
        assert!(!is_sdrtrunk_user_agent(None));
    }

    #[test]
    fn source_extracted_from_sources_array() {
        assert_eq!(
            source_from_sources_field(r#"[{"src": 123456, "pos": 0}]"#),
            Some("123456".to_string())
        );
    }

    #[test]
    fn frequencies_sum_into_signal_quality() {
        let json = r#"[{"errorCount": 1, "spikeCount": 2}, {"errorCount": 3, "spikeCount": 0}]"#;
        assert_eq!(
            signal_quality_from_frequencies(json),
            Some(SignalQuality { errors: 4, spikes: 2 })
        );
    }

    #[test]
    fn date_time_large_int_is_trunk_recorder_unix_seconds() {
        assert_eq!(parse_date_time("1700000000", 0), 1_700_000_000);
    }

    #[test]
    fn date_time_iso8601_is_rdio_scanner() {
        let ts = parse_date_time("2023-11-14T22:13:20+00:00", 0);
        assert_eq!(ts, 1_700_000_000);
    }

    #[test]
    fn date_time_unparseable_falls_back_to_now() {
        assert_eq!(parse_date_time("not a date", 42), 42);
    }

    #[test]
    fn resolve_source_prefers_explicit_field() {
        let fields = RawFields {
            source: Some("111".into()),
            ..Default::default()
        };
        assert_eq!(resolve_source(&fields, Some("..._FROM_222.mp3")), Some("111".to_string()));
    }

    #[test]
    fn test_probe_requires_sdrtrunk_user_agent() {
        let fields = RawFields {
            test: Some("1".into()),
            ..Default::default()
        };
        assert!(is_test_probe(&fields, Some("SDRTrunk/1.2")));
        assert!(!is_test_probe(&fields, Some("rdio-scanner")));
        assert!(!is_test_probe(&fields, None));
    }

    #[test]
    fn resolve_source_falls_back_to_filename() {
        let fields = RawFields::default();
        assert_eq!(
            resolve_source(&fields, Some("20260101_000000_1_2_FROM_222.mp3")),
            Some("222".to_string())
        );
    }
}
