//! Boundary to the inference engine.
//!
//! The scorer only sees named tensors going in and an ordered list of
//! tensors coming out. Engines plug in by implementing [`ModelRuntime`]
//! and a [`RuntimeLoader`] that builds one from a model directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::{Result, SidecarError};

pub type Tensor = ArrayD<f32>;

/// Dimension value used by [`ModelRuntime::input_shape`] for a dynamic axis.
pub const DYNAMIC_DIM: i64 = -1;

pub trait ModelRuntime: Send + Sync {
    /// Feeds `inputs` (operation name to tensor) and fetches `outputs`,
    /// returning one tensor per requested output in the same order.
    /// This call blocks.
    fn run(&self, inputs: HashMap<String, Tensor>, outputs: &[String]) -> Result<Vec<Tensor>>;

    /// Declared shape of an input operation, when the engine knows it.
    fn input_shape(&self, _operation: &str) -> Option<Vec<i64>> {
        None
    }
}

pub trait RuntimeLoader: Send + Sync {
    /// Loads the artifact stored in `dir`; `tag` is the directory's name.
    fn load(&self, dir: &Path, tag: &str) -> Result<Arc<dyn ModelRuntime>>;
}

/// Reads the normalized prediction at `[0][0]` of the first output tensor.
pub fn first_prediction(outputs: &[Tensor]) -> Result<f32> {
    let tensor = outputs
        .first()
        .ok_or_else(|| SidecarError::UnexpectedOutput("runtime returned no tensors".into()))?;

    if tensor.ndim() != 2 {
        return Err(SidecarError::UnexpectedOutput(format!(
            "expected a 2-dimensional tensor, got shape {:?}",
            tensor.shape()
        )));
    }

    tensor.get(&[0usize, 0][..]).copied().ok_or_else(|| {
        SidecarError::UnexpectedOutput(format!("empty output tensor of shape {:?}", tensor.shape()))
    })
}
