//! Single-layer linear runtime.
//!
//! Reads `model.json` from the model directory and computes one weighted
//! sum over the `[1, steps, columns]` input window. Useful for smoke
//! tests and for models exported as plain linear regressors.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Ix3};
use serde::{Deserialize, Serialize};

use super::runtime::{ModelRuntime, RuntimeLoader, Tensor};
use crate::{Result, SidecarError};

pub const DENSE_ARTIFACT: &str = "model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseArtifact {
    pub input_operation: String,
    pub output_operation: String,
    pub steps: usize,
    pub columns: usize,
    /// `steps * columns` weights, step-major.
    pub weights: Vec<f32>,
    #[serde(default)]
    pub bias: f32,
}

#[derive(Debug, Clone)]
pub struct DenseRuntime {
    artifact: DenseArtifact,
}

impl DenseRuntime {
    pub fn new(artifact: DenseArtifact) -> Result<Self> {
        if artifact.weights.len() != artifact.steps * artifact.columns {
            return Err(SidecarError::LoadModel(format!(
                "dense model expects {} weights, found {}",
                artifact.steps * artifact.columns,
                artifact.weights.len()
            )));
        }
        Ok(Self { artifact })
    }
}

impl ModelRuntime for DenseRuntime {
    fn run(&self, mut inputs: HashMap<String, Tensor>, outputs: &[String]) -> Result<Vec<Tensor>> {
        let input = inputs
            .remove(&self.artifact.input_operation)
            .ok_or_else(|| {
                SidecarError::InferenceFailed(format!(
                    "missing input for operation {}",
                    self.artifact.input_operation
                ))
            })?
            .into_dimensionality::<Ix3>()
            .map_err(|e| SidecarError::InferenceFailed(e.to_string()))?;

        let expected = (1, self.artifact.steps, self.artifact.columns);
        if input.dim() != expected {
            return Err(SidecarError::InferenceFailed(format!(
                "input shape {:?} does not match {:?}",
                input.dim(),
                expected
            )));
        }

        let sum: f32 = input
            .iter()
            .zip(self.artifact.weights.iter())
            .map(|(x, w)| x * w)
            .sum();
        let prediction = Array2::from_elem((1, 1), sum + self.artifact.bias).into_dyn();

        outputs
            .iter()
            .map(|name| {
                if *name == self.artifact.output_operation {
                    Ok(prediction.clone())
                } else {
                    Err(SidecarError::InferenceFailed(format!(
                        "unknown output operation {}",
                        name
                    )))
                }
            })
            .collect()
    }

    fn input_shape(&self, operation: &str) -> Option<Vec<i64>> {
        (operation == self.artifact.input_operation).then(|| {
            vec![
                1,
                self.artifact.steps as i64,
                self.artifact.columns as i64,
            ]
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLoader;

impl RuntimeLoader for DenseLoader {
    fn load(&self, dir: &Path, _tag: &str) -> Result<Arc<dyn ModelRuntime>> {
        let path = dir.join(DENSE_ARTIFACT);
        let content = fs::read_to_string(&path)
            .map_err(|e| SidecarError::LoadModel(format!("{}: {}", path.display(), e)))?;
        let artifact: DenseArtifact = serde_json::from_str(&content)
            .map_err(|e| SidecarError::LoadModel(format!("{}: {}", path.display(), e)))?;
        Ok(Arc::new(DenseRuntime::new(artifact)?))
    }
}
