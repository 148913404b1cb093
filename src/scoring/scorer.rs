//! Scoring cycle over every configured model.
//!
//! Each model walks `ReadinessCheck -> Assembling -> Inferring ->
//! Denormalizing -> Publishing` independently. A failure at any stage is
//! logged and skips only that model for the current cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::assembler::{self, AssembledInput};
use crate::metrics;
use crate::models::{DataPoint, Metric};
use crate::recorder::Recorder;
use crate::registry::runtime::first_prediction;
use crate::registry::Model;
use crate::store::SeriesStore;
use crate::{Result, SidecarError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadinessCheck,
    Assembling,
    Inferring,
    Denormalizing,
    Publishing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReadinessCheck => "readiness_check",
            Stage::Assembling => "assembling",
            Stage::Inferring => "inferring",
            Stage::Denormalizing => "denormalizing",
            Stage::Publishing => "publishing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ModelOutcome {
    Published(Metric),
    /// Target series unknown or not longer than `input_steps`.
    NotReady,
    Failed { stage: Stage, error: SidecarError },
}

#[derive(Debug)]
pub struct ModelReport {
    pub model: String,
    pub outcome: ModelOutcome,
}

/// Result of one pass over all models, in configured order.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub models: Vec<ModelReport>,
}

impl CycleReport {
    pub fn published(&self) -> impl Iterator<Item = &Metric> {
        self.models.iter().filter_map(|report| match &report.outcome {
            ModelOutcome::Published(metric) => Some(metric),
            _ => None,
        })
    }

    pub fn outcome(&self, model: &str) -> Option<&ModelOutcome> {
        self.models
            .iter()
            .find(|report| report.model == model)
            .map(|report| &report.outcome)
    }
}

pub struct Scorer {
    store: SeriesStore,
    models: Vec<Model>,
    recorder: Arc<dyn Recorder>,
    inference_timeout: Duration,
}

impl Scorer {
    pub fn new(
        store: SeriesStore,
        models: Vec<Model>,
        recorder: Arc<dyn Recorder>,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            store,
            models,
            recorder,
            inference_timeout,
        }
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Runs one scoring cycle. Never fails as a whole.
    pub async fn score_models(&self) -> CycleReport {
        metrics::record_cycle();
        let mut report = CycleReport::default();

        for model in &self.models {
            let outcome = match self.score_model(model).await {
                Ok(Some(metric)) => {
                    metrics::record_prediction(model.key());
                    ModelOutcome::Published(metric)
                }
                Ok(None) => {
                    debug!(model = %model.key(), "Not enough target history, skipping");
                    ModelOutcome::NotReady
                }
                Err((stage, error)) => {
                    warn!(model = %model.key(), %stage, %error, "Model skipped this cycle");
                    metrics::record_skip(model.key(), stage.as_str());
                    ModelOutcome::Failed { stage, error }
                }
            };
            report.models.push(ModelReport {
                model: model.key().to_string(),
                outcome,
            });
        }

        report
    }

    async fn score_model(
        &self,
        model: &Model,
    ) -> std::result::Result<Option<Metric>, (Stage, SidecarError)> {
        let meta = &model.metadata;

        // Copy everything this model reads in one critical section so
        // inference runs without holding the store lock.
        let snapshot = self.store.snapshot(
            std::iter::once(meta.target.as_str()).chain(meta.columns.iter().map(String::as_str)),
        );

        // ReadinessCheck: strictly more than input_steps target points
        match snapshot.len_of(&meta.target) {
            Some(len) if len > meta.input_steps => {}
            _ => return Ok(None),
        }

        let input = assembler::assemble(meta, &snapshot).map_err(|e| (Stage::Assembling, e))?;

        let normalized = self
            .infer(model, input)
            .await
            .map_err(|e| (Stage::Inferring, e))?;

        let value = assembler::window_scaler(&snapshot, &meta.target, meta.input_steps)
            .map(|scaler| scaler.denormalize(f64::from(normalized)))
            .map_err(|e| (Stage::Denormalizing, e))?;

        if !value.is_finite() {
            return Err((
                Stage::Denormalizing,
                SidecarError::NonFinitePrediction {
                    model: meta.model_key.clone(),
                    value,
                },
            ));
        }

        let metric = Metric::prediction(
            &meta.target,
            meta.predict_future_duration,
            DataPoint::new(value, Utc::now().timestamp()),
        );
        self.recorder.record(metric.clone());
        info!(model = %meta.model_key, target = %meta.target, value, "Published prediction");

        Ok(Some(metric))
    }

    /// Runs the model on a blocking thread, bounded by the inference
    /// timeout, and returns the normalized value at `[0][0]`.
    ///
    /// A timed-out call keeps its blocking thread until the runtime
    /// returns. Until then the model holds its in-flight slot and later
    /// cycles fail it with `InferenceBusy` instead of queueing more calls.
    async fn infer(&self, model: &Model, input: AssembledInput) -> Result<f32> {
        let permit = model
            .try_begin_inference()
            .ok_or_else(|| SidecarError::InferenceBusy(model.key().to_string()))?;
        let runtime = model.runtime.clone();
        let input_operation = model.metadata.input_operation.clone();
        let outputs = vec![model.metadata.output_operation.clone()];
        let timer = metrics::inference_timer(model.key());

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut inputs = HashMap::new();
            inputs.insert(input_operation, input.to_tensor());
            runtime.run(inputs, &outputs)
        });

        let result = match tokio::time::timeout(self.inference_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SidecarError::InferenceFailed(format!(
                "inference task failed: {}",
                join_err
            ))),
            Err(_) => Err(SidecarError::InferenceTimeout(self.inference_timeout)),
        };
        timer.observe_duration();

        let outputs = result.map_err(|e| match e {
            SidecarError::InferenceFailed(_) | SidecarError::InferenceTimeout(_) => e,
            other => SidecarError::InferenceFailed(other.to_string()),
        })?;
        first_prediction(&outputs)
    }
}
