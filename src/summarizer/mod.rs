//! Periodic summariser & Ask-AI (spec §4.6).
//!
//! `Summarizer::run_once` is invoked every 10 minutes by the scheduler: it
//! picks a handful of representative transcripts from the lookback window,
//! asks the shared LLM client for a summary, and publishes the result both
//! to a pinned Discord message and a JSON file the web client polls.
//! `Summarizer::ask` answers one bounded-window question for a single
//! talkgroup, invoked from the Discord client's modal-submission handler.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, MessageId};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::database::{calls, Call, Database};
use crate::error::{Error, Result};
use crate::fanout::discord::DiscordSender;
use crate::llm::{LLMClient, LLMRequest};

const SUMMARY_CHANNEL_CATEGORY: &str = "General";
const SUMMARY_CHANNEL_NAME: &str = "summaries";
const MAX_HIGHLIGHTS: usize = 5;
const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const ASK_AI_CONTEXT_TOKENS: u32 = 35_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Highlight {
    pub id: i64,
    pub talk_group: String,
    pub importance: String,
    pub description: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SummaryRun {
    pub summary: String,
    pub highlights: Vec<Highlight>,
}

/// Mirrors [`SummaryRun`] but leaves `id`/`timestamp` untyped, since the
/// model is free to return either a number or a numeral string for either
/// field (spec §4.6 step 4: "coerce any string timestamps ... back to
/// numeric Unix seconds").
#[derive(Debug, Deserialize)]
struct RawHighlight {
    id: serde_json::Value,
    talk_group: String,
    importance: serde_json::Value,
    description: String,
    timestamp: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawSummaryRun {
    summary: String,
    highlights: Vec<RawHighlight>,
}

fn coerce_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TryFrom<RawSummaryRun> for SummaryRun {
    type Error = Error;

    fn try_from(raw: RawSummaryRun) -> Result<Self> {
        let highlights = raw
            .highlights
            .into_iter()
            .map(|h| {
                Ok(Highlight {
                    id: coerce_i64(&h.id)
                        .ok_or_else(|| Error::Other("highlight id was neither a number nor a numeral string".to_string()))?,
                    talk_group: h.talk_group,
                    importance: coerce_string(&h.importance),
                    description: h.description,
                    timestamp: coerce_i64(&h.timestamp).unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SummaryRun { summary: raw.summary, highlights })
    }
}

/// From calls in `window`, pick up to [`MAX_HIGHLIGHTS`] candidates: the
/// single longest transcript in each of 4 equal time-buckets, plus the
/// overall longest transcript in the window if it isn't already one of
/// those four (spec §4.6 step 2).
fn pick_candidates(window: &[Call], window_start: i64, window_end: i64) -> Vec<Call> {
    if window.is_empty() {
        return Vec::new();
    }
    let bucket_width = ((window_end - window_start) / 4).max(1);

    let mut candidates: Vec<Call> = Vec::new();
    for bucket in 0..4 {
        let lo = window_start + bucket * bucket_width;
        let hi = if bucket == 3 { window_end } else { lo + bucket_width };
        let longest = window
            .iter()
            .filter(|c| c.timestamp >= lo && c.timestamp < hi)
            .max_by_key(|c| c.transcription.len());
        if let Some(call) = longest {
            if !candidates.iter().any(|c: &Call| c.id == call.id) {
                candidates.push(call.clone());
            }
        }
    }

    if let Some(overall) = window.iter().max_by_key(|c| c.transcription.len()) {
        if candidates.len() < MAX_HIGHLIGHTS && !candidates.iter().any(|c| c.id == overall.id) {
            candidates.push(overall.clone());
        }
    }

    candidates.truncate(MAX_HIGHLIGHTS);
    candidates
}

fn build_summary_prompt(candidates: &[Call]) -> LLMRequest {
    let transcripts = candidates
        .iter()
        .map(|c| format!("id={} talkgroup={} timestamp={}: {}", c.id, c.talk_group_id, c.timestamp, c.transcription))
        .collect::<Vec<_>>()
        .join("\n");

    LLMRequest {
        model: String::new(),
        prompt: format!(
            "Here are representative radio call transcripts from the last window:\n\n{transcripts}\n\n\
             Produce a JSON object with this exact shape and nothing else:\n\
             {{\"summary\": \"<one paragraph overview>\", \"highlights\": [{{\"id\": <call id>, \
             \"talk_group\": \"<talkgroup id>\", \"importance\": \"<low|medium|high>\", \
             \"description\": \"<one sentence>\", \"timestamp\": <unix seconds>}}]}}"
        ),
        max_tokens: 800,
        temperature: 0.3,
        system: Some(
            "You summarise emergency-dispatch radio traffic for a public safety audience. \
             Respond with JSON only, no surrounding prose or markdown fences."
                .to_string(),
        ),
    }
}

fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        rest = match rest[start..].find("</think>") {
            Some(end) => &rest[start + end + "</think>".len()..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

fn parse_summary_response(content: &str) -> Result<SummaryRun> {
    let raw: RawSummaryRun = serde_json::from_str(content.trim())?;
    raw.try_into()
}

fn render_embed_body(run: &SummaryRun) -> String {
    let mut body = run.summary.clone();
    if !run.highlights.is_empty() {
        body.push_str("\n\n**Highlights**\n");
        for h in &run.highlights {
            body.push_str(&format!("- [{}] ({}) {}\n", h.talk_group, h.importance, h.description));
        }
    }
    if body.len() > EMBED_DESCRIPTION_LIMIT {
        body.truncate(EMBED_DESCRIPTION_LIMIT);
    }
    body
}

pub struct Summarizer {
    db: Database,
    llm: Arc<dyn LLMClient>,
    sender: Arc<dyn DiscordSender>,
    config: Arc<Config>,
    json_output_path: String,
    pinned: Mutex<Option<(ChannelId, MessageId)>>,
}

impl Summarizer {
    pub fn new(db: Database, llm: Arc<dyn LLMClient>, sender: Arc<dyn DiscordSender>, config: Arc<Config>, json_output_path: String) -> Self {
        Self { db, llm, sender, config, json_output_path, pinned: Mutex::new(None) }
    }

    /// Run one summariser pass (spec §4.6 steps 1-5). Called on a 10-minute
    /// cron tick; absorbs every failure locally and logs rather than
    /// propagating, since a missed summary round is not fatal.
    pub async fn run_once(&self) -> Result<()> {
        let lookback = self.config.summary_lookback_hours as i64;
        let window = calls::transcripts_in_window(self.db.pool(), None, lookback).await?;
        if window.is_empty() {
            tracing::debug!("no transcripts in summary window; skipping run");
            return Ok(());
        }

        let window_end = Utc::now().timestamp();
        let window_start = window_end - lookback * 3600;
        let candidates = pick_candidates(&window, window_start, window_end);

        let response = self.llm.generate(build_summary_prompt(&candidates)).await?;
        let run = parse_summary_response(&strip_think_blocks(&response.content))?;

        self.publish_json(&run).await;
        self.publish_discord(&run).await;
        Ok(())
    }

    async fn publish_json(&self, run: &SummaryRun) {
        match serde_json::to_vec_pretty(run) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.json_output_path, bytes).await {
                    tracing::warn!(error = %e, path = %self.json_output_path, "failed to write summary JSON");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize summary run"),
        }
    }

    async fn publish_discord(&self, run: &SummaryRun) {
        let body = render_embed_body(run);
        let channel_id = match self.sender.ensure_channel(SUMMARY_CHANNEL_CATEGORY, SUMMARY_CHANNEL_NAME).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "failed to resolve summary channel");
                return;
            }
        };

        let mut pinned = self.pinned.lock().await;
        if let Some((cached_channel, message_id)) = *pinned {
            if cached_channel == channel_id {
                if let Err(e) = self.sender.edit_plain_message(channel_id, message_id, &body).await {
                    tracing::warn!(error = %e, "failed to edit pinned summary; will repost");
                    *pinned = None;
                } else {
                    return;
                }
            }
        }

        match self.sender.send_plain_message(channel_id, &body).await {
            Ok((message_id, _url)) => {
                if let Err(e) = self.sender.pin_message(channel_id, message_id).await {
                    tracing::warn!(error = %e, "failed to pin summary message");
                }
                *pinned = Some((channel_id, message_id));
            }
            Err(e) => tracing::warn!(error = %e, "failed to post summary message"),
        }
    }

    /// Ask-AI: answer one question scoped to `talk_group_id` over its last
    /// `ASK_AI_LOOKBACK_HOURS` of transcripts (spec §4.6 para 2).
    pub async fn ask(&self, talk_group_id: &str, question: &str) -> Result<String> {
        let lookback = self.config.ask_ai_lookback_hours as i64;
        let transcripts = calls::transcripts_in_window(self.db.pool(), Some(talk_group_id), lookback).await?;

        let tz: Tz = self.config.timezone.parse().unwrap_or(chrono_tz::UTC);
        let formatted = transcripts
            .iter()
            .map(|c| {
                let localised = chrono::DateTime::from_timestamp(c.timestamp, 0)
                    .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                format!("[{localised}] {}", c.transcription)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = LLMRequest {
            model: String::new(),
            prompt: format!(
                "Transcripts for talkgroup {talk_group_id} over the last {lookback} hours:\n\n{formatted}\n\n\
                 Question: {question}"
            ),
            max_tokens: ASK_AI_CONTEXT_TOKENS,
            temperature: 0.2,
            system: Some(
                "You answer questions about emergency-dispatch radio traffic using only the \
                 transcripts provided. If the answer isn't in the transcripts, say so."
                    .to_string(),
            ),
        };

        let response = self.llm.generate(request).await?;
        let mut answer = strip_think_blocks(&response.content);
        if answer.len() > EMBED_DESCRIPTION_LIMIT {
            answer.truncate(EMBED_DESCRIPTION_LIMIT);
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_call(id: i64, talk_group_id: &str, timestamp: i64, transcription: &str) -> Call {
        Call {
            id,
            talk_group_id: talk_group_id.to_string(),
            timestamp,
            transcription: transcription.to_string(),
            audio_file_path: format!("call_{id}.mp3"),
            address: None,
            lat: None,
            lon: None,
            category: None,
            errors: 0,
            spikes: 0,
            source_id: None,
            created_at: timestamp,
            audio_purged_at: None,
        }
    }

    #[test]
    fn picks_longest_transcript_per_bucket() {
        let window = vec![
            sample_call(1, "101", 0, "short"),
            sample_call(2, "101", 10, "this one is much longer than the other"),
            sample_call(3, "101", 30, "mid bucket pick"),
            sample_call(4, "101", 50, "late bucket entry that is the longest of all by far"),
        ];
        let candidates = pick_candidates(&window, 0, 40);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert!(ids.contains(&2));
        assert!(ids.contains(&4), "call outside [0,40) window fed into overall-longest slot");
    }

    #[test]
    fn caps_at_five_highlights() {
        let window: Vec<Call> = (0..20)
            .map(|i| sample_call(i, "101", i * 5, &format!("transcript number {i} of varying length {}", "x".repeat(i as usize))))
            .collect();
        let candidates = pick_candidates(&window, 0, 100);
        assert!(candidates.len() <= MAX_HIGHLIGHTS);
    }

    #[test]
    fn empty_window_yields_no_candidates() {
        assert!(pick_candidates(&[], 0, 100).is_empty());
    }

    #[test]
    fn coerces_string_timestamp_and_id() {
        let json = r#"{"summary":"quiet night","highlights":[{"id":"42","talk_group":"101","importance":"low","description":"a dog barked","timestamp":"1700000000"}]}"#;
        let run = parse_summary_response(json).unwrap();
        assert_eq!(run.highlights[0].id, 42);
        assert_eq!(run.highlights[0].timestamp, 1_700_000_000);
    }

    #[test]
    fn coerces_numeric_timestamp_and_id() {
        let json = r#"{"summary":"quiet night","highlights":[{"id":42,"talk_group":"101","importance":"low","description":"a dog barked","timestamp":1700000000}]}"#;
        let run = parse_summary_response(json).unwrap();
        assert_eq!(run.highlights[0].id, 42);
        assert_eq!(run.highlights[0].timestamp, 1_700_000_000);
    }

    #[test]
    fn strips_think_blocks_from_reply() {
        let reply = "<think>internal reasoning here</think>The answer is 42.";
        assert_eq!(strip_think_blocks(reply), "The answer is 42.");
    }

    #[test]
    fn leaves_reply_unchanged_without_think_block() {
        let reply = "The answer is 42.";
        assert_eq!(strip_think_blocks(reply), reply);
    }

    #[test]
    fn embed_body_includes_summary_and_highlight_lines() {
        let run = SummaryRun {
            summary: "a quiet evening".to_string(),
            highlights: vec![Highlight {
                id: 1,
                talk_group: "101".to_string(),
                importance: "low".to_string(),
                description: "a dog barked".to_string(),
                timestamp: 1_700_000_000,
            }],
        };
        let body = render_embed_body(&run);
        assert!(body.contains("a quiet evening"));
        assert!(body.contains("a dog barked"));
    }
}
