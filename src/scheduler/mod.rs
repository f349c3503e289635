//! Periodic task scheduler (spec §4.6, §5): the summariser every 10
//! minutes, hourly Discord message-cache GC, and daily audio GC, all as
//! `tokio_cron_scheduler::Job::new_async` jobs on one `JobScheduler`
//! (Design Note: same shape the base's `scheduler/mod.rs` uses for its
//! per-stream cron jobs, generalized to a small fixed job set).

use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::Config;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::fanout::discord::FanoutState;
use crate::storage::Storage;
use crate::summarizer::Summarizer;

pub struct Scheduler {
    scheduler: JobScheduler,
}

impl Scheduler {
    pub async fn new(
        db: Database,
        config: Arc<Config>,
        storage: Storage,
        fanout: Arc<FanoutState>,
        summarizer: Arc<Summarizer>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Other(format!("failed to create scheduler: {e}")))?;

        scheduler
            .add(summary_job(summarizer)?)
            .await
            .map_err(|e| Error::Other(format!("failed to add summariser job: {e}")))?;

        scheduler
            .add(message_cache_gc_job(fanout)?)
            .await
            .map_err(|e| Error::Other(format!("failed to add message-cache GC job: {e}")))?;

        scheduler
            .add(audio_gc_job(db, config, storage)?)
            .await
            .map_err(|e| Error::Other(format!("failed to add audio GC job: {e}")))?;

        Ok(Self { scheduler })
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| Error::Other(format!("failed to start scheduler: {e}")))?;
        tracing::info!("scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| Error::Other(format!("failed to stop scheduler: {e}")))?;
        Ok(())
    }
}

fn summary_job(summarizer: Arc<Summarizer>) -> Result<Job> {
    Job::new_async("0 */10 * * * *", move |_uuid, _lock| {
        let summarizer = summarizer.clone();
        Box::pin(async move {
            if let Err(e) = summarizer.run_once().await {
                tracing::error!(error = %e, "periodic summary run failed");
            }
        })
    })
    .map_err(|e| Error::Other(format!("failed to build summariser job: {e}")))
}

fn message_cache_gc_job(fanout: Arc<FanoutState>) -> Result<Job> {
    Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let fanout = fanout.clone();
        Box::pin(async move {
            fanout.gc_expired().await;
            tracing::debug!("discord message-cache GC ran");
        })
    })
    .map_err(|e| Error::Other(format!("failed to build message-cache GC job: {e}")))
}

fn audio_gc_job(db: Database, config: Arc<Config>, storage: Storage) -> Result<Job> {
    Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
        let db = db.clone();
        let config = config.clone();
        let storage = storage.clone();
        Box::pin(async move {
            if let Err(e) = run_audio_gc(&db, &config, &storage).await {
                tracing::error!(error = %e, "audio GC run failed");
            }
        })
    })
    .map_err(|e| Error::Other(format!("failed to build audio GC job: {e}")))
}

/// Delete object/file-store blobs for calls older than
/// `AUDIO_RETENTION_DAYS` (spec §3 AudioBlob lifecycle). The `Call` row
/// itself is kept — only the blob is reclaimed.
async fn run_audio_gc(db: &Database, config: &Config, storage: &Storage) -> Result<()> {
    let cutoff = Utc::now().timestamp() - config.audio_retention_days as i64 * 86_400;
    let candidates = crate::database::calls::audio_gc_candidates(db.pool(), cutoff).await?;
    tracing::info!(count = candidates.len(), "audio GC candidates");

    let now = Utc::now().timestamp();
    for call in candidates {
        match storage.delete(&call.audio_file_path).await {
            Ok(()) => {
                if let Err(e) = crate::database::calls::mark_audio_purged(db.pool(), call.id, now).await {
                    tracing::warn!(call_id = call.id, error = %e, "failed to record audio purge");
                }
            }
            Err(e) => {
                tracing::warn!(call_id = call.id, error = %e, "audio GC delete failed; will retry next run");
            }
        }
    }
    Ok(())
}
