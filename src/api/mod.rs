pub mod ingest;

pub use ingest::{router, serve, AppState};
