use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    metrics,
    models::{
        series_key, AppendRequest, AppendResponse, PredictionsResponse, SeriesResponse,
    },
    recorder::PrometheusRecorder,
    store::SeriesStore,
    Result, SidecarError,
};

#[derive(Clone)]
pub struct AppState {
    pub store: SeriesStore,
    pub recorder: Arc<PrometheusRecorder>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/append", post(append))
        .route("/api/v1/series/:name", get(read_series))
        .route("/api/v1/predictions", get(predictions))
        .route("/metrics", get(render_metrics))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Appends to the series named by the `__name__` label.
///
/// Points without that label are still accepted and buffered under the
/// empty key, which `/api/v1/series/:name` cannot address. They are
/// counted in `sidecar_unnamed_points_total`.
async fn append(
    State(state): State<AppState>,
    Json(request): Json<AppendRequest>,
) -> Json<AppendResponse> {
    let series = series_key(&request.labels);
    if series.is_empty() {
        warn!(points = request.points.len(), "Appending to a series without a __name__ label");
        metrics::record_unnamed_points(request.points.len());
    }

    let buffered = state.store.append(&series, &request.points);
    debug!(%series, received = request.points.len(), buffered, "Appended datapoints");

    Json(AppendResponse { series, buffered })
}

async fn read_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SeriesResponse>> {
    let points = state
        .store
        .read(&name)
        .ok_or_else(|| SidecarError::NotFound(format!("Series {} not found", name)))?;

    Ok(Json(SeriesResponse {
        series: name,
        points,
    }))
}

async fn predictions(State(state): State<AppState>) -> Json<PredictionsResponse> {
    Json(PredictionsResponse {
        predictions: state.recorder.latest(),
    })
}

async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let body = state.recorder.render()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    ))
}

async fn health() -> &'static str {
    "ok"
}

pub async fn serve(addr: &str, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        SidecarError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| SidecarError::Internal(format!("Server error: {}", e)))
}
