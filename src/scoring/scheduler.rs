//! Periodic trigger for scoring cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::scorer::Scorer;

/// Runs a scoring cycle every `period` until `cancel` fires. The first
/// cycle starts one period after launch, once ingestion had a chance to
/// fill the buffers.
pub async fn run(scorer: Arc<Scorer>, period: Duration, cancel: CancellationToken) {
    info!(
        interval_secs = period.as_secs_f64(),
        models = scorer.models().len(),
        "Scoring loop started"
    );

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Scoring loop stopping");
                break;
            }
            _ = interval.tick() => {
                let report = scorer.score_models().await;
                debug!(
                    models = report.models.len(),
                    published = report.published().count(),
                    "Scoring cycle finished"
                );
            }
        }
    }
}
