//! Per-talkgroup Discord coalescer (spec §4.4).
//!
//! `FanoutState` owns the in-memory channel cache (talkgroup -> resolved
//! Discord channel, created on demand) and message cache (channel -> the
//! most recently posted/edited coalesced embed), plus the read-only
//! keyword-alert path. All Discord I/O goes through the [`DiscordSender`]
//! trait so the coalescing decision table can be exercised without a live
//! bot connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serenity::all::{
    ButtonStyle, ChannelId, ChannelType, CreateActionRow, CreateButton, CreateChannel,
    CreateMessage, EditMessage, GuildId, Http, MessageId,
};
use tokio::sync::Mutex;

use crate::database::calls::Call;
use crate::database::{keywords, talkgroups, Database};
use crate::error::Result;

const COOLDOWN: Duration = Duration::from_secs(15);
const BODY_BUDGET: usize = 4096;

/// Discord I/O seam. The real implementation is [`SerenityDiscordSender`];
/// tests use an in-memory fake to drive the coalescing table deterministically.
#[async_trait]
pub trait DiscordSender: Send + Sync {
    async fn ensure_channel(&self, category: &str, name: &str) -> Result<ChannelId>;
    /// Returns the new message's id and jump URL.
    async fn send_message(&self, channel_id: ChannelId, talk_group_id: &str, body: &str) -> Result<(MessageId, String)>;
    async fn edit_message(&self, channel_id: ChannelId, message_id: MessageId, talk_group_id: &str, body: &str) -> Result<()>;
    /// Pin a message, used by the summariser to keep its rolling summary
    /// easy to find (spec §4.6). Best-effort: a no-op default for senders
    /// that don't care (and the test fake) is fine either way.
    async fn pin_message(&self, _channel_id: ChannelId, _message_id: MessageId) -> Result<()> {
        Ok(())
    }
    /// A message with no per-talkgroup buttons, used by the summariser
    /// (spec §4.6) where "Listen Live"/"Ask AI" don't apply.
    async fn send_plain_message(&self, channel_id: ChannelId, body: &str) -> Result<(MessageId, String)> {
        self.send_message(channel_id, "", body).await
    }
    async fn edit_plain_message(&self, channel_id: ChannelId, message_id: MessageId, body: &str) -> Result<()> {
        self.edit_message(channel_id, message_id, "", body).await
    }
}

struct MessageCacheEntry {
    message_id: MessageId,
    first_post_ts: Instant,
    body: String,
    call_ids: Vec<i64>,
    url: String,
}

pub struct FanoutState {
    db: Database,
    sender: Arc<dyn DiscordSender>,
    public_domain: String,
    channels: Mutex<HashMap<String, ChannelId>>,
    messages: Mutex<HashMap<ChannelId, MessageCacheEntry>>,
}

impl FanoutState {
    pub fn new(db: Database, sender: Arc<dyn DiscordSender>, public_domain: String) -> Self {
        Self {
            db,
            sender,
            public_domain,
            channels: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `(category, channel)` for a talkgroup — its county names the
    /// category, its alpha_tag names the channel — creating either on first
    /// use and memoising the result (spec §4.4).
    async fn resolve_channel(&self, talk_group_id: &str) -> Result<Option<ChannelId>> {
        if let Some(id) = self.channels.lock().await.get(talk_group_id) {
            return Ok(Some(*id));
        }

        let Some(tg) = talkgroups::get(self.db.pool(), talk_group_id).await? else {
            return Ok(None);
        };

        let category = if tg.county.is_empty() { "Uncategorized" } else { tg.county.as_str() };
        let name = if tg.alpha_tag.is_empty() { talk_group_id } else { tg.alpha_tag.as_str() };
        let channel_id = self.sender.ensure_channel(category, name).await?;
        self.channels.lock().await.insert(talk_group_id.to_string(), channel_id);
        Ok(Some(channel_id))
    }

    fn format_line(&self, call: &Call) -> String {
        let source_tag = call.source_id.as_deref().unwrap_or("unknown");
        let signal = if call.errors > 0 || call.spikes > 0 {
            format!(" ({}E/{}S)", call.errors, call.spikes)
        } else {
            String::new()
        };
        let audio_url = format!("https://{}/audio/{}", self.public_domain, call.id);
        format!("**{source_tag}**{signal}: {} [Audio]({audio_url})", call.transcription)
    }

    pub async fn publish(&self, call: &Call) {
        let channel_id = match self.resolve_channel(&call.talk_group_id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::debug!(call_id = call.id, "no talkgroup row yet; skipping discord fanout");
                return;
            }
            Err(e) => {
                tracing::warn!(call_id = call.id, error = %e, "failed to resolve discord channel");
                return;
            }
        };

        let line = self.format_line(call);
        if let Some(url) = self.publish_line(channel_id, call.id, &call.talk_group_id, &line).await {
            self.check_alerts(call, &url).await;
        }
    }

    /// Apply the coalescing decision table (spec §4.4) for one new line in
    /// `channel_id`. Returns the jump URL of the message the line ended up
    /// in, or `None` if the Discord call itself failed.
    async fn publish_line(
        &self,
        channel_id: ChannelId,
        call_id: i64,
        talk_group_id: &str,
        line: &str,
    ) -> Option<String> {
        let mut cache = self.messages.lock().await;

        let edit_target = cache.get(&channel_id).and_then(|entry| {
            let fresh = entry.first_post_ts.elapsed() < COOLDOWN;
            let fits = entry.body.len() + 2 + line.len() <= BODY_BUDGET;
            if fresh && fits {
                Some((entry.message_id, format!("{}\n\n{}", entry.body, line)))
            } else {
                None
            }
        });

        if let Some((message_id, new_body)) = edit_target {
            match self.sender.edit_message(channel_id, message_id, talk_group_id, &new_body).await {
                Ok(()) => {
                    let entry = cache.get_mut(&channel_id).expect("entry checked above");
                    entry.body = new_body;
                    entry.call_ids.push(call_id);
                    return Some(entry.url.clone());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discord edit failed; evicting and posting fresh");
                    cache.remove(&channel_id);
                }
            }
        } else {
            cache.remove(&channel_id);
        }

        match self.sender.send_message(channel_id, talk_group_id, line).await {
            Ok((message_id, url)) => {
                cache.insert(
                    channel_id,
                    MessageCacheEntry {
                        message_id,
                        first_post_ts: Instant::now(),
                        body: line.to_string(),
                        call_ids: vec![call_id],
                        url: url.clone(),
                    },
                );
                Some(url)
            }
            Err(e) => {
                tracing::warn!(error = %e, "discord send failed; call not fanned out");
                None
            }
        }
    }

    /// Read-only keyword-alert path (spec §4.4, §1 Scope: CRUD is out of
    /// core). Matching hits are posted with a jump-link to the coalesced
    /// post that carried them.
    async fn check_alerts(&self, call: &Call, message_url: &str) {
        let Ok(matching) = keywords::for_talkgroup(self.db.pool(), &call.talk_group_id).await else {
            return;
        };
        let hits = keywords::matches(&matching, &call.transcription);
        if hits.is_empty() {
            return;
        }
        let Ok(alerts_channel) = self.sender.ensure_channel("Alerts", "keyword-alerts").await else {
            return;
        };
        for hit in hits {
            let line = format!(
                "**{}** matched on talkgroup {}: [jump to call]({message_url})",
                hit.keyword, call.talk_group_id
            );
            if let Err(e) = self.sender.send_message(alerts_channel, &call.talk_group_id, &line).await {
                tracing::warn!(error = %e, keyword = %hit.keyword, "failed to post keyword alert");
            }
        }
    }

    /// Drop message-cache entries older than the cooldown so a talkgroup
    /// that goes quiet starts a fresh embed next time, instead of editing a
    /// stale one indefinitely. Run hourly by the scheduler (spec §4.6).
    pub async fn gc_expired(&self) {
        let mut cache = self.messages.lock().await;
        cache.retain(|_, entry| entry.first_post_ts.elapsed() < COOLDOWN);
    }
}

/// Live Discord backend, grounded in `serenity`'s channel/message builder API.
pub struct SerenityDiscordSender {
    http: Arc<Http>,
    guild_id: GuildId,
    public_domain: String,
}

impl SerenityDiscordSender {
    pub fn new(http: Arc<Http>, guild_id: GuildId, public_domain: String) -> Self {
        Self { http, guild_id, public_domain }
    }

    /// "Listen Live" is a link button straight to the web client's live feed
    /// for this talkgroup; "Ask AI" opens a modal, so it has to round-trip
    /// through an interaction and needs a `custom_id` instead (spec §4.4).
    fn action_row(&self, talk_group_id: &str) -> CreateActionRow {
        CreateActionRow::Buttons(vec![
            CreateButton::new_link(format!("https://{}/live?talkgroup={talk_group_id}", self.public_domain))
                .label("Listen Live"),
            CreateButton::new(format!("ask_ai:{talk_group_id}"))
                .label("Ask AI")
                .style(ButtonStyle::Secondary),
        ])
    }

    async fn find_channel(&self, parent: Option<ChannelId>, kind: ChannelType, name: &str) -> Result<Option<ChannelId>> {
        let channels = self.http.get_channels(self.guild_id).await?;
        Ok(channels
            .into_iter()
            .find(|c| c.kind == kind && c.name.eq_ignore_ascii_case(name) && c.parent_id == parent)
            .map(|c| c.id))
    }
}

#[async_trait]
impl DiscordSender for SerenityDiscordSender {
    async fn ensure_channel(&self, category: &str, name: &str) -> Result<ChannelId> {
        let category_id = match self.find_channel(None, ChannelType::Category, category).await? {
            Some(id) => id,
            None => {
                let builder = CreateChannel::new(category).kind(ChannelType::Category);
                self.guild_id.create_channel(&self.http, builder).await?.id
            }
        };

        match self.find_channel(Some(category_id), ChannelType::Text, name).await? {
            Some(id) => Ok(id),
            None => {
                let builder = CreateChannel::new(name).kind(ChannelType::Text).category(category_id);
                let channel = self.guild_id.create_channel(&self.http, builder).await?;
                Ok(channel.id)
            }
        }
    }

    async fn send_message(&self, channel_id: ChannelId, talk_group_id: &str, body: &str) -> Result<(MessageId, String)> {
        let builder = CreateMessage::new().content(body).components(vec![self.action_row(talk_group_id)]);
        let message = channel_id.send_message(&self.http, builder).await?;
        Ok((message.id, message.link()))
    }

    async fn edit_message(&self, channel_id: ChannelId, message_id: MessageId, talk_group_id: &str, body: &str) -> Result<()> {
        let builder = EditMessage::new().content(body).components(vec![self.action_row(talk_group_id)]);
        channel_id.edit_message(&self.http, message_id, builder).await?;
        Ok(())
    }

    async fn pin_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()> {
        channel_id.pin(&self.http, message_id).await?;
        Ok(())
    }

    async fn send_plain_message(&self, channel_id: ChannelId, body: &str) -> Result<(MessageId, String)> {
        let builder = CreateMessage::new().content(body);
        let message = channel_id.send_message(&self.http, builder).await?;
        Ok((message.id, message.link()))
    }

    async fn edit_plain_message(&self, channel_id: ChannelId, message_id: MessageId, body: &str) -> Result<()> {
        let builder = EditMessage::new().content(body);
        channel_id.edit_message(&self.http, message_id, builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    struct FakeSender {
        next_id: AtomicU64,
        sent: TokioMutex<Vec<(ChannelId, String)>>,
        fail_edits: std::sync::atomic::AtomicBool,
    }

    impl FakeSender {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1),
                sent: TokioMutex::new(Vec::new()),
                fail_edits: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DiscordSender for FakeSender {
        async fn ensure_channel(&self, _category: &str, _name: &str) -> Result<ChannelId> {
            Ok(ChannelId::new(42))
        }

        async fn send_message(&self, channel_id: ChannelId, _tg: &str, body: &str) -> Result<(MessageId, String)> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().await.push((channel_id, body.to_string()));
            Ok((MessageId::new(id), format!("https://discord.com/channels/1/{channel_id}/{id}")))
        }

        async fn edit_message(&self, _channel_id: ChannelId, _message_id: MessageId, _tg: &str, _body: &str) -> Result<()> {
            if self.fail_edits.load(Ordering::SeqCst) {
                Err(crate::error::Error::FanoutTransient("forced failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_call(id: i64, transcription: &str) -> Call {
        Call {
            id,
            talk_group_id: "101".to_string(),
            timestamp: 1_700_000_000,
            transcription: transcription.to_string(),
            audio_file_path: format!("call_{id}.mp3"),
            address: None,
            lat: None,
            lon: None,
            category: None,
            errors: 0,
            spikes: 0,
            source_id: Some("123456".to_string()),
            created_at: 1_700_000_000,
            audio_purged_at: None,
        }
    }

    async fn state_with_talkgroup() -> (FanoutState, Arc<FakeSender>) {
        let pool = test_pool().await;
        talkgroups::upsert_seen(&pool, "101", "PD Dispatch", "Police").await.unwrap();
        let db = Database::from_pool(pool);
        let sender = Arc::new(FakeSender::new());
        (FanoutState::new(db, sender.clone(), "relay.example.com".to_string()), sender)
    }

    #[tokio::test]
    async fn first_publish_sends_a_new_message() {
        let (state, sender) = state_with_talkgroup().await;
        state.publish(&sample_call(1, "first call")).await;
        assert_eq!(sender.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn second_publish_within_cooldown_coalesces_via_edit() {
        let (state, sender) = state_with_talkgroup().await;
        state.publish(&sample_call(1, "first call")).await;
        state.publish(&sample_call(2, "second call")).await;

        assert_eq!(sender.sent.lock().await.len(), 1, "coalesced call must not send a second message");
        let cache = state.messages.lock().await;
        let entry = cache.values().next().unwrap();
        assert!(entry.body.contains("first call"));
        assert!(entry.body.contains("second call"));
        assert_eq!(entry.call_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn body_budget_overflow_evicts_and_sends_fresh() {
        let (state, sender) = state_with_talkgroup().await;
        let long_line = "x".repeat(4090);
        state.publish(&sample_call(1, &long_line)).await;
        state.publish(&sample_call(2, "short follow-up")).await;

        assert_eq!(sender.sent.lock().await.len(), 2, "budget overflow must start a fresh message");
    }

    #[tokio::test]
    async fn fifty_rapid_calls_coalesce_into_capped_embeds_never_exceeding_budget() {
        let (state, sender) = state_with_talkgroup().await;
        let line = "x".repeat(200);

        for id in 1..=50 {
            state.publish(&sample_call(id, &line)).await;
        }

        let sent = sender.sent.lock().await;
        for (_, body) in sent.iter() {
            assert!(body.len() <= BODY_BUDGET, "no posted body may exceed the embed budget");
        }
        // 200-char lines joined by "\n\n" fit ~20 to an embed before the next
        // one overflows the 4096 budget, so 50 calls should span a handful of
        // embeds rather than one unbounded edit chain.
        assert!(sent.len() > 1, "must have started at least one fresh embed after the first fills up");
        assert!(sent.len() < 50, "must still coalesce — not one message per call");
    }

    #[tokio::test]
    async fn failed_edit_evicts_and_sends_fresh() {
        let (state, sender) = state_with_talkgroup().await;
        state.publish(&sample_call(1, "first call")).await;
        sender.fail_edits.store(true, Ordering::SeqCst);
        state.publish(&sample_call(2, "second call")).await;

        assert_eq!(sender.sent.lock().await.len(), 2, "a failed edit must fall back to a new message");
    }
}
