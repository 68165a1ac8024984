use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    engine::{ingest::IngestEngine, monitor::Monitor},
    error::EngineError,
    models::{response::ApiResponse, webhook::Gateway},
    store::Store,
};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub struct AppState {
    pub ingest: Arc<IngestEngine>,
    pub monitor: Arc<Monitor>,
    pub store: Arc<dyn Store>,
    pub stats_window: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/{gateway}", post(receive_webhook))
        .route("/stats", get(stats))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(gateway) = Gateway::from_str(&gateway) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                "unknown_gateway".to_string(),
                format!("No such gateway: {}", gateway),
            )),
        )
            .into_response();
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.ingest.ingest(gateway, &body, signature).await {
        // Anything persisted is acked with 200 so the gateway stops retrying.
        Ok(ack) => (
            StatusCode::OK,
            Json(ApiResponse::success(ack, "Webhook received".to_string())),
        )
            .into_response(),
        Err(EngineError::SignatureInvalid) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                "signature_invalid".to_string(),
                "Webhook signature verification failed".to_string(),
            )),
        )
            .into_response(),
        Err(EngineError::UnknownGateway(name)) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error(
                "unknown_gateway".to_string(),
                format!("Gateway not configured: {}", name),
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error(
                "internal_error".to_string(),
                e.to_string(),
            )),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.monitor.compute_stats(state.stats_window).await {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                report,
                "Webhook delivery statistics".to_string(),
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error(
                "internal_error".to_string(),
                e.to_string(),
            )),
        )
            .into_response(),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                "healthy".to_string(),
                "Service is healthy".to_string(),
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error(
                "store_unreachable".to_string(),
                e.to_string(),
            )),
        )
            .into_response(),
    }
}
