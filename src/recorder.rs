//! Publishing side of the scorer.
//!
//! [`PrometheusRecorder`] keeps the latest value of every recorded label
//! set and mirrors it into a gauge so predictions can be scraped next to
//! the sidecar's own metrics.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::models::{Metric, DURATION_LABEL, NAME_LABEL};
use crate::Result;

pub trait Recorder: Send + Sync {
    /// Fire-and-forget; implementations must not panic on bad input.
    fn record(&self, metric: Metric);
}

pub struct PrometheusRecorder {
    registry: Registry,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    latest: Mutex<BTreeMap<String, Metric>>,
}

impl Default for PrometheusRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusRecorder {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            gauges: Mutex::new(HashMap::new()),
            latest: Mutex::new(BTreeMap::new()),
        }
    }

    /// Latest recorded metric per label set, ordered by label set.
    pub fn latest(&self) -> Vec<Metric> {
        self.latest.lock().values().cloned().collect()
    }

    /// Text exposition of the default registry followed by the recorded
    /// predictions.
    pub fn render(&self) -> Result<String> {
        let mut families = prometheus::gather();
        families.extend(self.registry.gather());

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::SidecarError::Internal(e.to_string()))
    }

    fn set_gauge(&self, metric: &Metric) -> Result<()> {
        let name = metric.name();
        let duration = metric
            .labels
            .get(DURATION_LABEL)
            .map(String::as_str)
            .unwrap_or_default();

        let mut gauges = self.gauges.lock();
        if !gauges.contains_key(name) {
            let gauge = GaugeVec::new(
                Opts::new(name, format!("Sidecar prediction for {}", name)),
                &[DURATION_LABEL],
            )?;
            self.registry.register(Box::new(gauge.clone()))?;
            gauges.insert(name.to_string(), gauge);
        }

        if let Some(gauge) = gauges.get(name) {
            gauge
                .get_metric_with_label_values(&[duration])?
                .set(metric.data_point.value);
        }
        Ok(())
    }
}

impl Recorder for PrometheusRecorder {
    fn record(&self, metric: Metric) {
        if let Err(e) = self.set_gauge(&metric) {
            warn!(name = %metric.name(), error = %e, "Failed to export prediction gauge");
        }
        self.latest.lock().insert(label_key(&metric), metric);
    }
}

/// Stable identity of a label set, `__name__` first.
fn label_key(metric: &Metric) -> String {
    let mut labels: Vec<_> = metric
        .labels
        .iter()
        .filter(|(key, _)| key.as_str() != NAME_LABEL)
        .map(|(key, value)| format!("{}={:?}", key, value))
        .collect();
    labels.sort();
    format!("{}{{{}}}", metric.name(), labels.join(","))
}
