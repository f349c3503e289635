//! The address post-processing pipeline, spec §4.3 steps 1–7. Pure and
//! deterministic so it can be unit-tested without touching the LLM.

use lazy_static::lazy_static;
use regex::Regex;

use super::SENTINEL;

lazy_static! {
    static ref THINK_BLOCK: Regex = Regex::new(r"(?s)<think>.*?</think>").unwrap();
    static ref PARENTHESIZED: Regex = Regex::new(r"\([^)]*\)").unwrap();
}

const STREET_ABBREVIATIONS: &[(&str, &str)] = &[
    ("Avenue", "Ave"),
    ("Boulevard", "Blvd"),
    ("Circle", "Cir"),
    ("Court", "Ct"),
    ("Drive", "Dr"),
    ("Highway", "Hwy"),
    ("Lane", "Ln"),
    ("Parkway", "Pkwy"),
    ("Place", "Pl"),
    ("Road", "Rd"),
    ("Square", "Sq"),
    ("Street", "St"),
    ("Terrace", "Ter"),
];

fn strip_think_block(s: &str) -> String {
    THINK_BLOCK.replace_all(s, "").trim().to_string()
}

fn strip_comments(s: &str) -> String {
    let without_parens = PARENTHESIZED.replace_all(s, "");
    without_parens
        .lines()
        .filter(|line| !line.trim_start().starts_with("Note:"))
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn shorten(s: &str) -> String {
    let first_line = s.lines().next().unwrap_or(s).trim();
    let has_newline = s.lines().count() > 1;
    let comma_count = first_line.matches(',').count();

    if comma_count <= 3 && !has_newline {
        return first_line.to_string();
    }

    let three_segments = first_line
        .splitn(4, ',')
        .take(3)
        .collect::<Vec<_>>()
        .join(",")
        .trim()
        .to_string();

    if three_segments.len() <= first_line.len() {
        three_segments
    } else {
        first_line.to_string()
    }
}

/// The `regex` crate has no lookaround, and a naive `replace_all` on chained
/// separators (`7-9-0-8`) drops every other dash since matches can't
/// overlap. A single left-to-right scan against the *original* neighbours
/// avoids both problems.
fn collapse_digit_separators(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        let is_digit_separator = (c == ',' || c == '-')
            && i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_digit()
            && chars[i + 1].is_ascii_digit();
        if !is_digit_separator {
            out.push(c);
        }
    }
    out
}

fn normalize_street_types(s: &str) -> String {
    let mut out = s.to_string();
    for (long, short) in STREET_ABBREVIATIONS {
        let pattern = Regex::new(&format!(r"(?i)\b{long}\b")).unwrap();
        out = pattern.replace_all(&out, *short).to_string();
    }
    out
}

fn append_state_if_absent(s: &str, state: &str) -> String {
    if state.is_empty() {
        return s.to_string();
    }
    if s.to_lowercase().contains(&state.to_lowercase()) {
        s.to_string()
    } else {
        format!("{s}, {state}")
    }
}

/// Run the full post-processing pipeline. Returns `None` when the model's
/// answer is (or coerces to) the sentinel.
pub fn normalize_address(raw: &str, state: &str) -> Option<String> {
    let stripped = strip_think_block(raw);

    if stripped.trim() == SENTINEL {
        return None;
    }

    let without_comments = strip_comments(&stripped);
    if without_comments.trim() == SENTINEL || without_comments.is_empty() {
        return None;
    }

    let shortened = shorten(&without_comments);

    // Generic / city-only answers (no digits at all) coerce to the sentinel
    // rather than being geocoded, per spec §4.3.
    if !shortened.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let collapsed = collapse_digit_separators(&shortened);
    let abbreviated = normalize_street_types(&collapsed);
    let with_state = append_state_if_absent(&abbreviated, state);

    Some(with_state.trim().to_string())
}
