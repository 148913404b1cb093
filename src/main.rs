use std::process;
use std::sync::Arc;

use predict_sidecar::{
    api::{self, AppState},
    config::SidecarConfig,
    logging, metrics,
    recorder::PrometheusRecorder,
    registry::{self, DenseLoader},
    scoring::{scheduler, Scorer},
    store::SeriesStore,
    Result,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = logging::init_logger("predict_sidecar") {
        eprintln!("{}", e);
        process::exit(1);
    }

    if let Err(e) = run().await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = SidecarConfig::from_env()?;
    metrics::init_metrics();

    // Models are required to start; any load error is fatal
    let models = registry::load_models(&config.model_paths, &DenseLoader)?;
    info!(models = models.len(), max_points = config.max_points, "Models loaded");

    let store = SeriesStore::new(config.max_points);
    let recorder = Arc::new(PrometheusRecorder::new());
    let scorer = Arc::new(Scorer::new(
        store.clone(),
        models,
        recorder.clone(),
        config.inference_timeout,
    ));

    let cancel = CancellationToken::new();
    let scoring = tokio::spawn(scheduler::run(
        scorer,
        config.score_interval,
        cancel.clone(),
    ));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    let state = AppState { store, recorder };
    let served = api::serve(&config.bind_addr(), state, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = scoring.await {
        error!("Scoring loop aborted: {}", e);
    }
    served
}
