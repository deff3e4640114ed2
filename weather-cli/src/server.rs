use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, instrument};
use weather_core::{UpstreamHealth, WeatherLookup, WeatherPayload, model::resolve_location};

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    city: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    cached_locations: usize,
    upstreams: Vec<UpstreamHealth>,
}

pub fn router(lookup: Arc<WeatherLookup>) -> Router {
    Router::new()
        .route("/v1/weather", get(get_weather))
        .route("/health", get(health))
        .with_state(lookup)
}

#[instrument(skip(lookup), name = "api_get_weather")]
async fn get_weather(
    State(lookup): State<Arc<WeatherLookup>>,
    Query(query): Query<WeatherQuery>,
) -> (StatusCode, Json<WeatherPayload>) {
    let location = resolve_location(query.city.as_deref());
    let payload = WeatherPayload::from(lookup.lookup(&location).await);
    let status = StatusCode::from_u16(payload.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, Json(payload))
}

async fn health(State(lookup): State<Arc<WeatherLookup>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cached_locations: lookup.cache().len(),
        upstreams: lookup.health(),
    })
}

pub async fn serve(bind: &str, lookup: Arc<WeatherLookup>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    info!(address = %listener.local_addr()?, "weather service listening");

    axum::serve(listener, router(lookup))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("weather service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
