//! Builds the multi-variate model input from buffered series.

use ndarray::Array3;

use super::scaler::Scaler;
use crate::models::DataPoint;
use crate::registry::{ModelMetadata, Tensor};
use crate::store::SeriesSnapshot;
use crate::{Result, SidecarError};

/// Normalized model input, one contiguous block of `steps` values per
/// column in the order the metadata lists the columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledInput {
    values: Vec<f32>,
    steps: usize,
    columns: usize,
}

impl AssembledInput {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Lays the values out as `[batch = 1][steps][columns]`.
    pub fn to_tensor(&self) -> Tensor {
        let steps = self.steps;
        Array3::from_shape_fn((1, steps, self.columns), |(_, step, column)| {
            self.values[column * steps + step]
        })
        .into_dyn()
    }
}

/// Last `steps` points of `series`, oldest first.
pub fn window<'a>(
    snapshot: &'a SeriesSnapshot,
    series: &str,
    steps: usize,
) -> Result<&'a [DataPoint]> {
    let points = snapshot
        .get(series)
        .ok_or_else(|| SidecarError::MissingSeries(series.to_string()))?;

    if points.len() < steps {
        return Err(SidecarError::InsufficientHistory {
            series: series.to_string(),
            required: steps,
            available: points.len(),
        });
    }
    Ok(&points[points.len() - steps..])
}

/// Scaler fitted on the last `steps` points of `series`.
pub fn window_scaler(snapshot: &SeriesSnapshot, series: &str, steps: usize) -> Result<Scaler> {
    let points = window(snapshot, series, steps)?;
    Scaler::fit(points).map_err(|source| SidecarError::Scale {
        series: series.to_string(),
        source,
    })
}

/// Normalizes each column's window independently and concatenates them.
/// Every column is validated before any value is produced.
pub fn assemble(metadata: &ModelMetadata, snapshot: &SeriesSnapshot) -> Result<AssembledInput> {
    let steps = metadata.input_steps;
    let windows = metadata
        .columns
        .iter()
        .map(|column| window(snapshot, column, steps).map(|points| (column, points)))
        .collect::<Result<Vec<_>>>()?;

    let mut values = Vec::with_capacity(steps * windows.len());
    for (column, points) in windows {
        let scaler = Scaler::fit(points).map_err(|source| SidecarError::Scale {
            series: column.clone(),
            source,
        })?;
        values.extend(scaler.normalize(points).into_iter().map(|v| v as f32));
    }

    Ok(AssembledInput {
        values,
        steps,
        columns: metadata.columns.len(),
    })
}
