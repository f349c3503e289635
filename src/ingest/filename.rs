//! Audio key generation/parsing (spec §3 AudioBlob, §4.1).
//!
//! The key doubles as the content-identity used to dedupe uploads: two
//! uploads with the same `(timestamp, system, talkgroup, source)` always
//! produce the same key.

use chrono::{NaiveDateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioKeyParts {
    pub timestamp: i64,
    pub system: String,
    pub talkgroup: String,
    pub source: String,
    pub extension: String,
}

/// `YYYYMMDD_HHMMSS_<system>_<tg>_TO_<tg>_FROM_<src>.<ext>`
pub fn generate(parts: &AudioKeyParts) -> String {
    let dt = Utc
        .timestamp_opt(parts.timestamp, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

    format!(
        "{}_{}_{}_TO_{}_FROM_{}.{}",
        dt.format("%Y%m%d"),
        dt.format("%H%M%S"),
        parts.system,
        parts.talkgroup,
        parts.source,
        parts.extension,
    )
}

/// Recover the full quintuple embedded in a [`generate`]-produced filename.
/// Exact inverse of `generate`: `parse(generate(parts)) == Some(parts)` for
/// any `parts` whose `system`/`talkgroup`/`source` don't themselves contain
/// underscores (the same assumption `generate` makes when it interpolates
/// them unescaped).
pub fn parse(filename: &str) -> Option<AudioKeyParts> {
    let (stem, extension) = filename.rsplit_once('.')?;
    let (left, right) = stem.split_once("_TO_")?;
    let left_parts: Vec<&str> = left.split('_').collect();
    let [date, time, system, talkgroup] = left_parts[..] else {
        return None;
    };
    let (_talkgroup_repeated, source) = right.split_once("_FROM_")?;

    let naive = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), "%Y%m%d_%H%M%S").ok()?;
    let timestamp = Utc.from_utc_datetime(&naive).timestamp();

    Some(AudioKeyParts {
        timestamp,
        system: system.to_string(),
        talkgroup: talkgroup.to_string(),
        source: source.to_string(),
        extension: extension.to_string(),
    })
}

/// Parse the source unit ID embedded as `..._FROM_<digits>...` in an
/// upstream filename (SDRTrunk, when the `source` field is absent).
pub fn parse_source_from_filename(filename: &str) -> Option<String> {
    let idx = filename.find("_FROM_")?;
    let rest = &filename[idx + "_FROM_".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

pub fn extension_of(filename: &str) -> String {
    filename
        .rsplit('.')
        .next()
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}
