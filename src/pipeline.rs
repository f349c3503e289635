//! The call pipeline (spec §2 component 6): the orchestrator that, for one
//! newly-created `Call`, drives transcription → (if mapped) extraction →
//! geocoding → fan-out, in the total order spec §5 requires: insert →
//! transcription update → (maybe) coordinates update.
//!
//! Runs as a detached task per call so the ingestion handler can respond to
//! the uploader immediately once the audio and row are persisted.

use std::sync::Arc;

use crate::database::{calls, Database};
use crate::extractor::{self, geocode::GeocodeProvider};
use crate::fanout::{discord::FanoutState, live::Watermarks};
use crate::llm::LLMClient;
use crate::transcription::{queue::TranscriptionQueue, AudioRef};
use crate::Config;

pub struct Pipeline {
    pub db: Database,
    pub config: Arc<Config>,
    pub transcription: Arc<TranscriptionQueue>,
    pub llm: Arc<dyn LLMClient>,
    pub geocoder: Arc<dyn GeocodeProvider>,
    pub fanout: Arc<FanoutState>,
    pub watermarks: Arc<Watermarks>,
}

impl Pipeline {
    /// Process one call end to end. Never propagates an error upward: every
    /// stage absorbs its own failures per the §7 propagation policy, and the
    /// `Call` row is always eventually written with whatever is known.
    pub async fn process(&self, call_id: i64, audio: AudioRef) {
        let transcription = self.transcription.submit(audio).await;

        if let Err(e) = calls::update_transcription(self.db.pool(), call_id, &transcription).await {
            tracing::error!(call_id, error = %e, "failed to persist transcription");
            return;
        }

        let Ok(Some(call)) = calls::get(self.db.pool(), call_id).await else {
            tracing::error!(call_id, "call vanished after transcription update");
            return;
        };

        if !transcription.is_empty() {
            match extractor::extract_and_geocode(
                &self.config,
                &self.llm,
                self.geocoder.as_ref(),
                &call.talk_group_id,
                &transcription,
            )
            .await
            {
                Ok(Some(location)) => {
                    let hyperlinked = crate::fanout::hyperlink_address(
                        &transcription,
                        &location.raw_address,
                        location.lat,
                        location.lon,
                    );
                    if let Err(e) = calls::update_coordinates(
                        self.db.pool(),
                        call_id,
                        location.lat,
                        location.lon,
                        &location.formatted_address,
                        &hyperlinked,
                    )
                    .await
                    {
                        tracing::error!(call_id, error = %e, "failed to persist coordinates");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(call_id, error = %e, "extraction/geocoding failed");
                }
            }
        }

        let Ok(Some(final_call)) = calls::get(self.db.pool(), call_id).await else {
            return;
        };

        self.fanout.publish(&final_call).await;
        self.watermarks.notify_ready(final_call.id);
    }
}
