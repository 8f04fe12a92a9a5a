use crate::prelude::*;

use crate::coordinator::{Coordinator, IngestOutcome, IngestRequest};

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

// Flat rate used for the rough running-cost figure on /api/stats.
const COST_PER_KWH: f64 = 0.12;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub config: ConfigWrapper,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/eagle", post(ingest))
        .route("/api/power-data", post(ingest))
        .route("/api/stats", get(stats))
        .route("/api/power-data/latest", get(latest))
        .route("/api/security/stats", get(security_stats))
        .route("/api/security/clear/:ip", post(security_clear))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let http = state.config.http();
    let addr = format!("{}:{}", http.host(), http.port());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    Ok(())
}

fn cors_layer(config: &ConfigWrapper) -> CorsLayer {
    let configured = config.http().cors_origins().to_vec();
    if configured.is_empty() {
        return CorsLayer::new().allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct StatsQuery {
    hours: Option<i64>,
    api_key: Option<String>,
}

/// POST /eagle (and the legacy /api/power-data alias)
async fn ingest(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiKeyQuery>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let request = IngestRequest {
        peer_addr: peer.ip().to_string(),
        forwarded_for: header_value(&headers, "x-forwarded-for"),
        api_key: header_value(&headers, "x-api-key").or(query.api_key),
        content_type: header_value(&headers, header::CONTENT_TYPE.as_str()),
        body,
    };

    match state.coordinator.ingest(request).await {
        // all soft outcomes collapse to an empty 200 the meter accepts
        IngestOutcome::Accepted => StatusCode::OK.into_response(),
        IngestOutcome::Unauthorized => {
            error_response(StatusCode::UNAUTHORIZED, "invalid or missing API key")
        }
        IngestOutcome::Denied => error_response(StatusCode::FORBIDDEN, "access denied"),
        IngestOutcome::RateLimited => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
        }
    }
}

/// GET /
async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "eagle-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/eagle": "POST - receive Eagle meter data",
            "/api/power-data": "POST - receive Eagle meter data (legacy path)",
            "/api/stats": "GET - ingestion and power statistics",
            "/api/power-data/latest": "GET - most recent power reading",
            "/api/security/stats": "GET - security monitoring statistics",
            "/health": "GET - health check",
        },
    }))
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "influx_enabled": state.config.influx().enabled(),
        "uptime_seconds": state.coordinator.uptime_seconds(),
    }))
}

/// GET /api/stats
async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Response {
    if !authorized(&state, &headers, &query.api_key) {
        return error_response(StatusCode::UNAUTHORIZED, "API key required");
    }

    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 365);

    let (mut min, mut max, mut avg) = (0.0_f64, 0.0_f64, 0.0_f64);
    let query_text = format!(
        "SELECT MIN(power_w), MAX(power_w), MEAN(power_w) FROM energy_monitor WHERE time > now() - {}h",
        hours
    );
    match state.coordinator.store().query(&query_text).await {
        Ok(rows) => {
            if let Some(row) = rows.first() {
                min = row.get("min").and_then(|v| v.as_f64()).unwrap_or(0.0);
                max = row.get("max").and_then(|v| v.as_f64()).unwrap_or(0.0);
                avg = row.get("mean").and_then(|v| v.as_f64()).unwrap_or(0.0);
            }
        }
        Err(err) => warn!("stats query failed: {:#}", err),
    }

    let kwh = avg / 1000.0 * hours as f64;
    let cost = (kwh * COST_PER_KWH * 100.0).round() / 100.0;

    let current_power = state
        .coordinator
        .stats
        .lock()
        .unwrap()
        .last_power_reading
        .unwrap_or(0.0);

    Json(json!({
        "current_power": current_power,
        "min": min,
        "max": max,
        "avg": avg,
        "cost": cost,
        "hours": hours,
        "monitor_stats": state.coordinator.stats_json(),
    }))
    .into_response()
}

/// GET /api/power-data/latest
async fn latest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
) -> Response {
    if !authorized(&state, &headers, &query.api_key) {
        return error_response(StatusCode::UNAUTHORIZED, "API key required");
    }

    let query_text =
        "SELECT power_w FROM energy_monitor WHERE time > now() - 1h ORDER BY time DESC LIMIT 1";
    match state.coordinator.store().query(query_text).await {
        Ok(rows) => match rows.first() {
            Some(row) => Json(json!({
                "status": "success",
                "power_w": row.get("power_w"),
                "timestamp": row.get("time"),
            }))
            .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "status": "no_data", "message": "No recent power readings" })),
            )
                .into_response(),
        },
        Err(err) => {
            error!("latest-reading query failed: {:#}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store query failed")
        }
    }
}

/// GET /api/security/stats
async fn security_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
) -> Response {
    if !admin_authorized(&state, &headers, &query.api_key) {
        return error_response(StatusCode::FORBIDDEN, "admin access required");
    }

    Json(state.coordinator.security.stats(Utils::utc())).into_response()
}

/// POST /api/security/clear/{ip}
async fn security_clear(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ApiKeyQuery>,
) -> Response {
    if !admin_authorized(&state, &headers, &query.api_key) {
        return error_response(StatusCode::FORBIDDEN, "admin access required");
    }

    state.coordinator.security.clear(&ip);
    Json(json!({ "status": "cleared", "ip_address": ip })).into_response()
}

fn authorized(state: &AppState, headers: &HeaderMap, query_key: &Option<String>) -> bool {
    match state.config.security().api_key() {
        Some(expected) => {
            let offered = header_value(headers, "x-api-key").or_else(|| query_key.clone());
            offered.as_deref() == Some(expected.as_str())
        }
        None => true,
    }
}

/// The admin key is required even when the regular key is unset.
fn admin_authorized(state: &AppState, headers: &HeaderMap, query_key: &Option<String>) -> bool {
    match state.config.security().admin_key() {
        Some(expected) => {
            let offered = header_value(headers, "x-api-key").or_else(|| query_key.clone());
            offered.as_deref() == Some(expected.as_str())
        }
        None => false,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
