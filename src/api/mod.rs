//! REST API for on-demand enrichment

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::enrichment::cache::ResolutionCache;
use crate::enrichment::flow::{enrich_flow_record, AddressFields};
use crate::models::address::is_enrichable;
use crate::models::{EnrichedAddress, FlowRecord};

type ApiError = (StatusCode, Json<Value>);

/// Application state shared across handlers
pub struct AppState {
    /// `None` when enrichment is disabled
    pub resolver: Option<Arc<ResolutionCache>>,
    pub fields: AddressFields,
    pub metrics: Option<PrometheusHandle>,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Enrichment
        .route("/api/v1/lookup/:ip", get(lookup_address))
        .route("/api/v1/enrich", post(enrich_flow))

        // Prometheus
        .route("/metrics", get(render_metrics))

        .with_state(state)
}

// ==================== Handlers ====================

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "flowscope",
        "version": env!("CARGO_PKG_VERSION"),
        "enrichment": state.resolver.is_some(),
    }))
}

fn resolver(state: &AppState) -> Result<&ResolutionCache, ApiError> {
    state.resolver.as_deref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "IP enrichment is disabled" })),
        )
    })
}

async fn lookup_address(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> Result<Json<EnrichedAddress>, ApiError> {
    let resolver = resolver(&state)?;

    if !is_enrichable(&ip) {
        tracing::debug!(address = %ip, "Lookup for non-routable address");
        return Ok(Json(EnrichedAddress::unknown(ip)));
    }

    Ok(Json(resolver.get_or_resolve(&ip).await))
}

async fn enrich_flow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<FlowRecord>, ApiError> {
    let resolver = resolver(&state)?;

    let Value::Object(fields) = body else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "flow record must be a JSON object" })),
        ));
    };

    let mut record = FlowRecord::from(fields);
    enrich_flow_record(&mut record, resolver, &state.fields).await;

    Ok(Json(record))
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(StatusCode::NOT_FOUND)
}
