use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::scoring::scaler::ScaleError;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("Missing datapoints for series: {0}")]
    MissingSeries(String),

    #[error("Insufficient history for {series}: need {required} points, have {available}")]
    InsufficientHistory {
        series: String,
        required: usize,
        available: usize,
    },

    #[error("Cannot scale window of {series}: {source}")]
    Scale {
        series: String,
        #[source]
        source: ScaleError,
    },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("Previous inference of {0} is still running")]
    InferenceBusy(String),

    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("Model {model} produced a non-finite prediction: {value}")]
    NonFinitePrediction { model: String, value: f64 },

    #[error("Error loading model: {0}")]
    LoadModel(String),

    #[error("Error loading model metadata: {0}")]
    LoadMetadata(String),

    #[error("Invalid model metadata: {0}")]
    InvalidMetadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SidecarError {
    fn from(err: serde_json::Error) -> Self {
        SidecarError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SidecarError {
    fn from(err: std::io::Error) -> Self {
        SidecarError::Internal(err.to_string())
    }
}

impl From<prometheus::Error> for SidecarError {
    fn from(err: prometheus::Error) -> Self {
        SidecarError::Internal(err.to_string())
    }
}

impl IntoResponse for SidecarError {
    fn into_response(self) -> Response {
        let status = match self {
            SidecarError::NotFound(_) | SidecarError::MissingSeries(_) => StatusCode::NOT_FOUND,
            SidecarError::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SidecarError>;
