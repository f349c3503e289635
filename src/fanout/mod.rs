//! Discord and live (map/feed) fan-out (spec §4.4, §4.5).

pub mod bot;
pub mod discord;
pub mod live;

/// Rewrite `transcription` so the first occurrence of `raw_address` becomes
/// a markdown hyperlink to an external map URL for `(lat, lon)` (spec §4.3:
/// "rewrite the stored transcript so occurrences of the raw address string
/// are hyperlinked").
pub fn hyperlink_address(transcription: &str, raw_address: &str, lat: f64, lon: f64) -> String {
    if raw_address.is_empty() || !transcription.contains(raw_address) {
        return transcription.to_string();
    }
    let url = format!("https://www.openstreetmap.org/?mlat={lat}&mlon={lon}#map=18/{lat}/{lon}");
    let link = format!("[{raw_address}]({url})");
    transcription.replacen(raw_address, &link, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperlinks_first_occurrence_only() {
        let out = hyperlink_address("fire at 123 Main St, again 123 Main St", "123 Main St", 41.0, -74.0);
        assert_eq!(out.matches("123 Main St").count(), 1);
        assert!(out.contains("[123 Main St]("));
        assert!(out.contains("again 123 Main St"));
    }

    #[test]
    fn leaves_transcript_unchanged_when_address_absent() {
        let out = hyperlink_address("no address here", "123 Main St", 41.0, -74.0);
        assert_eq!(out, "no address here");
    }
}
