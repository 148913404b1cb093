//! Min-max scaling of a single window.
//!
//! Parameters are fitted on the window itself every cycle, so they drift
//! as the window slides. A window without a usable range is rejected
//! instead of producing infinite or NaN values.

use thiserror::Error;

use crate::models::DataPoint;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ScaleError {
    #[error("window is empty")]
    Empty,

    #[error("window contains a non-finite value: {0}")]
    NonFinite(f64),

    #[error("window range is degenerate (min {min}, max {max})")]
    Degenerate { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaler {
    min: f64,
    max: f64,
    scale: f64,
    offset: f64,
}

impl Scaler {
    /// Fits `scale = 1 / (max - min)` and `offset = -min * scale` over the
    /// window values.
    pub fn fit(window: &[DataPoint]) -> Result<Self, ScaleError> {
        let first = window.first().ok_or(ScaleError::Empty)?;
        if let Some(point) = window.iter().find(|point| !point.value.is_finite()) {
            return Err(ScaleError::NonFinite(point.value));
        }
        let (min, max) = window
            .iter()
            .fold((first.value, first.value), |(min, max), point| {
                (min.min(point.value), max.max(point.value))
            });

        let range = max - min;
        // max - min can still overflow to infinity for finite extremes
        if !(range.is_finite() && range > 0.0) {
            return Err(ScaleError::Degenerate { min, max });
        }

        let scale = 1.0 / range;
        Ok(Scaler {
            min,
            max,
            scale,
            offset: -min * scale,
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn normalize_value(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    /// Normalizes every point of `window`, which is usually the window the
    /// scaler was fitted on.
    pub fn normalize(&self, window: &[DataPoint]) -> Vec<f64> {
        window
            .iter()
            .map(|point| self.normalize_value(point.value))
            .collect()
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}
