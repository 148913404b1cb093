use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramTimer, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // Ingestion metrics
    pub static ref INGESTED_POINTS: IntCounter = register_int_counter!(
        "sidecar_ingested_points_total",
        "Total number of datapoints appended to series buffers"
    ).unwrap();

    pub static ref UNNAMED_POINTS: IntCounter = register_int_counter!(
        "sidecar_unnamed_points_total",
        "Datapoints appended without a __name__ label"
    ).unwrap();

    pub static ref BUFFERED_SERIES: IntGauge = register_int_gauge!(
        "sidecar_buffered_series",
        "Number of series currently buffered"
    ).unwrap();

    // Scoring metrics
    pub static ref SCORING_CYCLES: IntCounter = register_int_counter!(
        "sidecar_scoring_cycles_total",
        "Total number of scoring cycles run"
    ).unwrap();

    pub static ref MODEL_SKIPS: IntCounterVec = register_int_counter_vec!(
        "sidecar_model_skips_total",
        "Models skipped during a scoring cycle, by stage",
        &["model", "stage"]
    ).unwrap();

    pub static ref PREDICTIONS: IntCounterVec = register_int_counter_vec!(
        "sidecar_predictions_total",
        "Total number of predictions published",
        &["model"]
    ).unwrap();

    pub static ref INFERENCE_DURATION: HistogramVec = register_histogram_vec!(
        "sidecar_inference_duration_seconds",
        "Model inference duration in seconds",
        &["model"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

pub fn init_metrics() {
    // Touch every metric so the exposition is complete before the first cycle
    lazy_static::initialize(&INGESTED_POINTS);
    lazy_static::initialize(&UNNAMED_POINTS);
    lazy_static::initialize(&BUFFERED_SERIES);
    lazy_static::initialize(&SCORING_CYCLES);
    lazy_static::initialize(&MODEL_SKIPS);
    lazy_static::initialize(&PREDICTIONS);
    lazy_static::initialize(&INFERENCE_DURATION);
}

pub fn record_ingested_points(count: usize) {
    INGESTED_POINTS.inc_by(count as u64);
}

pub fn record_unnamed_points(count: usize) {
    UNNAMED_POINTS.inc_by(count as u64);
}

pub fn set_buffered_series(count: usize) {
    BUFFERED_SERIES.set(count as i64);
}

pub fn record_cycle() {
    SCORING_CYCLES.inc();
}

pub fn record_skip(model: &str, stage: &str) {
    MODEL_SKIPS.with_label_values(&[model, stage]).inc();
}

pub fn record_prediction(model: &str) {
    PREDICTIONS.with_label_values(&[model]).inc();
}

pub fn inference_timer(model: &str) -> HistogramTimer {
    INFERENCE_DURATION.with_label_values(&[model]).start_timer()
}
