//! CallRelay daemon entrypoint: loads configuration, wires every component
//! together, and runs the HTTP server, live-fanout polling loops, scheduler,
//! and Discord client side by side on one multi-threaded runtime (spec §5).

use std::sync::Arc;

use callrelay::config::Config;
use callrelay::database::Database;
use callrelay::extractor::geocode;
use callrelay::fanout::bot::BotHandler;
use callrelay::fanout::discord::{DiscordSender, FanoutState, SerenityDiscordSender};
use callrelay::fanout::live::{run_feed_loop, run_map_loop, Watermarks};
use callrelay::pipeline::Pipeline;
use callrelay::scheduler::Scheduler;
use callrelay::summarizer::Summarizer;
use callrelay::{auth, llm, server, storage, transcription};
use serenity::all::{GatewayIntents, GuildId};
use transcription::queue::TranscriptionQueue;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env()?);

    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    let storage = match config.storage_mode {
        callrelay::config::StorageMode::Local => storage::Storage::local(config.audio_dir.clone())?,
        callrelay::config::StorageMode::S3 => storage::Storage::s3(
            config.s3_bucket.clone().unwrap_or_default(),
            config.s3_endpoint.clone().unwrap_or_default(),
            config.s3_access_key.clone().unwrap_or_default(),
            config.s3_secret_key.clone().unwrap_or_default(),
            config.s3_region.clone(),
        )?,
    };
    storage.initialize().await?;

    let api_keys = Arc::new(auth::ApiKeyStore::load(&config.api_key_file).await?);
    let llm_client = llm::build_client(&config)?;
    let geocoder: Arc<dyn geocode::GeocodeProvider> = Arc::from(geocode::build_provider(&config));

    let transcription_engine = transcription::build_engine(&config)?;
    let transcription_queue = Arc::new(TranscriptionQueue::new(transcription_engine, config.max_concurrent_transcriptions));

    let discord_token = config.discord_token.clone().ok_or_else(|| {
        callrelay::Error::Configuration("DISCORD_TOKEN is required".to_string())
    })?;
    let guild_id = std::env::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(GuildId::new)
        .ok_or_else(|| callrelay::Error::Configuration("DISCORD_GUILD_ID is required".to_string()))?;
    let http = Arc::new(serenity::http::Http::new(&discord_token));

    let discord_sender: Arc<dyn DiscordSender> =
        Arc::new(SerenityDiscordSender::new(http.clone(), guild_id, config.public_domain.clone()));
    let fanout = Arc::new(FanoutState::new(db.clone(), discord_sender.clone(), config.public_domain.clone()));

    let summary_json_path = std::env::var("SUMMARY_JSON_PATH").unwrap_or_else(|_| "summary.json".to_string());
    let summarizer = Arc::new(Summarizer::new(
        db.clone(),
        llm_client.clone(),
        discord_sender.clone(),
        config.clone(),
        summary_json_path,
    ));

    let watermarks = Arc::new(Watermarks::new());

    let pipeline = Arc::new(Pipeline {
        db: db.clone(),
        config: config.clone(),
        transcription: transcription_queue,
        llm: llm_client.clone(),
        geocoder,
        fanout: fanout.clone(),
        watermarks: watermarks.clone(),
    });

    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    tokio::fs::create_dir_all(&logs_dir).await?;

    let scheduler_storage = storage.clone();
    let state = server::AppState {
        storage,
        api_keys,
        pipeline,
        logs_dir,
    };
    let (router, io) = server::build(state);

    tokio::spawn(run_map_loop(db.clone(), llm_client.clone(), io.clone(), watermarks.clone()));
    tokio::spawn(run_feed_loop(db.clone(), io, watermarks));

    let scheduler = Scheduler::new(db, config.clone(), scheduler_storage, fanout, summarizer.clone()).await?;
    scheduler.start().await?;

    let mut discord_client = serenity::Client::builder(&discord_token, GatewayIntents::GUILDS)
        .event_handler(BotHandler::new(summarizer))
        .await?;
    tokio::spawn(async move {
        if let Err(e) = discord_client.start().await {
            tracing::error!(error = %e, "discord client stopped unexpectedly");
        }
    });

    server::run(router, "0.0.0.0", config.bot_port).await?;
    Ok(())
}
