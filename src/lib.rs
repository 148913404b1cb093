//! Windowed multi-series scoring sidecar.
//!
//! Ingested series are kept in bounded buffers ([`store`]). On every
//! scoring cycle each configured model gets a min-max normalized input
//! window assembled from its columns, runs through its runtime, and the
//! denormalized prediction is republished as a new series ([`recorder`]).

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod recorder;
pub mod registry;
pub mod scoring;
pub mod store;

pub use error::{Result, SidecarError};
