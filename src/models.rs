use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Label set attached to a series, e.g. `{"__name__": "cpu_usage"}`.
pub type Labels = HashMap<String, String>;

/// Label holding the series name; the only label used to key buffers.
pub const NAME_LABEL: &str = "__name__";

/// Label carrying the model's forecast horizon on published predictions.
pub const DURATION_LABEL: &str = "predict_duration";

/// Prefix of the series name given to published predictions.
pub const PREDICTION_PREFIX: &str = "predict_sidecar";

/// A single sample. `timestamp` is unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    pub timestamp: i64,
}

impl DataPoint {
    pub fn new(value: f64, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

/// A labelled point handed to a [`Recorder`](crate::recorder::Recorder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub labels: Labels,
    pub data_point: DataPoint,
}

impl Metric {
    /// Builds the published form of a prediction for `target`.
    pub fn prediction(target: &str, predict_future_duration: i64, data_point: DataPoint) -> Self {
        let mut labels = Labels::new();
        labels.insert(
            NAME_LABEL.to_string(),
            format!("{}:{}", PREDICTION_PREFIX, target),
        );
        labels.insert(
            DURATION_LABEL.to_string(),
            predict_future_duration.to_string(),
        );
        Self { labels, data_point }
    }

    pub fn name(&self) -> &str {
        self.labels.get(NAME_LABEL).map(String::as_str).unwrap_or_default()
    }
}

/// Derives the buffer key of a series. Only `__name__` participates; a
/// missing name maps to the empty key.
pub fn series_key(labels: &Labels) -> String {
    labels.get(NAME_LABEL).cloned().unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendRequest {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    pub series: String,
    pub buffered: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub series: String,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionsResponse {
    pub predictions: Vec<Metric>,
}
