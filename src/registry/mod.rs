pub mod dense;
pub mod runtime;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::{Result, SidecarError};
use runtime::{ModelRuntime, RuntimeLoader, DYNAMIC_DIM};

pub use dense::{DenseLoader, DenseRuntime};
pub use runtime::Tensor;

/// Name of the metadata file expected in every model directory.
pub const PARAMS_FILE: &str = "params.json";

/// Static description of a trained model, read from `params.json`.
///
/// `columns` lists the input series in the order the model was trained
/// on; that order fixes the column axis of the input tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_key: String,
    pub input_steps: usize,
    pub input_operation: String,
    pub output_steps: usize,
    pub output_operation: String,
    pub predict_future_duration: i64,
    pub target: String,
    pub columns: Vec<String>,
}

impl ModelMetadata {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            SidecarError::InvalidMetadata(format!("{}: {}", self.model_key, reason))
        };

        if self.input_steps == 0 {
            return Err(invalid("input_steps must be positive".into()));
        }
        if self.output_steps == 0 {
            return Err(invalid("output_steps must be positive".into()));
        }
        if self.input_operation.is_empty() || self.output_operation.is_empty() {
            return Err(invalid("input and output operations must be named".into()));
        }
        if self.target.is_empty() {
            return Err(invalid("target must be named".into()));
        }
        if self.columns.is_empty() {
            return Err(invalid("columns must not be empty".into()));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.columns.iter().find(|column| !seen.insert(column.as_str())) {
            return Err(invalid(format!("column {} is listed twice", duplicate)));
        }

        Ok(())
    }

    /// Checks the declared `[batch, steps, columns]` input shape of a
    /// runtime against this metadata. Dynamic axes match anything.
    pub fn check_input_shape(&self, shape: &[i64]) -> Result<()> {
        let expected = [1, self.input_steps as i64, self.columns.len() as i64];
        let matches = shape.len() == expected.len()
            && shape
                .iter()
                .zip(expected.iter())
                .all(|(declared, wanted)| *declared == DYNAMIC_DIM || declared == wanted);

        if !matches {
            return Err(SidecarError::InvalidMetadata(format!(
                "{}: runtime input {} has shape {:?}, metadata implies {:?}",
                self.model_key, self.input_operation, shape, expected
            )));
        }
        Ok(())
    }
}

/// A runtime handle paired with its metadata.
///
/// Clones share one in-flight slot, so at most one inference call per
/// model is running at any time.
#[derive(Clone)]
pub struct Model {
    pub runtime: Arc<dyn ModelRuntime>,
    pub metadata: ModelMetadata,
    inflight: Arc<Semaphore>,
}

impl Model {
    pub fn new(runtime: Arc<dyn ModelRuntime>, metadata: ModelMetadata) -> Result<Self> {
        metadata.validate()?;
        if let Some(shape) = runtime.input_shape(&metadata.input_operation) {
            metadata.check_input_shape(&shape)?;
        }
        Ok(Self {
            runtime,
            metadata,
            inflight: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn key(&self) -> &str {
        &self.metadata.model_key
    }

    /// Claims the in-flight slot, or `None` while a previous call still
    /// runs. The slot is released when the permit drops.
    pub fn try_begin_inference(&self) -> Option<OwnedSemaphorePermit> {
        self.inflight.clone().try_acquire_owned().ok()
    }

    pub fn is_inferring(&self) -> bool {
        self.inflight.available_permits() == 0
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Loads every model of a colon-separated list of directories, in order.
///
/// Any unusable directory fails the whole load. An empty `path_spec`
/// yields no models.
pub fn load_models(path_spec: &str, loader: &dyn RuntimeLoader) -> Result<Vec<Model>> {
    if path_spec.is_empty() {
        return Ok(Vec::new());
    }

    path_spec
        .split(':')
        .map(|path| load_model(Path::new(path), loader))
        .collect()
}

pub fn load_model(dir: &Path, loader: &dyn RuntimeLoader) -> Result<Model> {
    if !dir.is_dir() {
        return Err(SidecarError::LoadModel(format!(
            "invalid model path: {}",
            dir.display()
        )));
    }

    let tag = dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SidecarError::LoadModel(format!("invalid model path: {}", dir.display())))?;

    let runtime = loader.load(dir, tag)?;
    let metadata = read_metadata(&dir.join(PARAMS_FILE))?;
    let model = Model::new(runtime, metadata)?;

    info!(
        model = %model.key(),
        target = %model.metadata.target,
        columns = model.metadata.columns.len(),
        input_steps = model.metadata.input_steps,
        "Loaded model from {}",
        dir.display()
    );
    Ok(model)
}

pub fn read_metadata(path: &Path) -> Result<ModelMetadata> {
    let content = fs::read_to_string(path)
        .map_err(|e| SidecarError::LoadMetadata(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| SidecarError::LoadMetadata(format!("{}: {}", path.display(), e)))
}
