use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use strike_pipeline::{
    find_nearby, GeoPoint, IngestionStats, NearbyQuery, NearbyStrike, StoreError, StrikeQuery,
    StrikeRecord, StrikeStats, StrikeStore, TimeWindow,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const DEFAULT_MINUTES: i64 = 60;
const MAX_MINUTES: i64 = 1440;
const DEFAULT_RADIUS_KM: f64 = 50.0;
const MAX_RADIUS_KM: f64 = 500.0;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StrikeStore>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
            code: "INVALID_PARAMETER".to_string(),
        }),
    )
}

fn database_error(context: &'static str) -> impl FnOnce(StoreError) -> ApiError {
    move |e| {
        error!(error = %e, "{}", context);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Database error: {}", e),
                code: "DATABASE_ERROR".to_string(),
            }),
        )
    }
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Check `value` against inclusive bounds. NaN is never in range.
fn in_range<T: PartialOrd + Display + Copy>(name: &str, value: T, min: T, max: T) -> Result<T, ApiError> {
    if !(min..=max).contains(&value) {
        return Err(bad_request(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(value)
}

fn optional_in_range<T: PartialOrd + Display + Copy>(
    name: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<Option<T>, ApiError> {
    value.map(|v| in_range(name, v, min, max)).transpose()
}

fn limit(value: Option<i64>) -> Result<i64, ApiError> {
    in_range("limit", value.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)
}

fn minutes(value: Option<i64>) -> Result<i64, ApiError> {
    in_range("minutes", value.unwrap_or(DEFAULT_MINUTES), 1, MAX_MINUTES)
}

/// Query parameters for the strike list
#[derive(Debug, Deserialize)]
pub struct StrikeListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Strikes at or after this time (ISO 8601)
    pub since: Option<DateTime<Utc>>,
    /// Strikes at or before this time (ISO 8601)
    pub until: Option<DateTime<Utc>>,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
}

impl StrikeListParams {
    fn into_query(self) -> Result<StrikeQuery, ApiError> {
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(bad_request(format!("offset must be >= 0, got {}", offset)));
        }

        Ok(StrikeQuery {
            since: self.since,
            until: self.until,
            min_lat: optional_in_range("min_lat", self.min_lat, -90.0, 90.0)?,
            max_lat: optional_in_range("max_lat", self.max_lat, -90.0, 90.0)?,
            min_lon: optional_in_range("min_lon", self.min_lon, -180.0, 180.0)?,
            max_lon: optional_in_range("max_lon", self.max_lon, -180.0, 180.0)?,
            limit: Some(limit(self.limit)?),
            offset: Some(offset),
        })
    }
}

/// Query parameters for recent strikes
#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

/// Query parameters for a radius search
#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: f64,
    pub lon: f64,
    /// Search radius in kilometres
    pub radius: Option<f64>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

impl NearbyParams {
    fn into_query(self) -> Result<NearbyQuery, ApiError> {
        let lat = in_range("lat", self.lat, -90.0, 90.0)?;
        let lon = in_range("lon", self.lon, -180.0, 180.0)?;
        let radius_km = in_range(
            "radius",
            self.radius.unwrap_or(DEFAULT_RADIUS_KM),
            1.0,
            MAX_RADIUS_KM,
        )?;

        Ok(NearbyQuery {
            center: GeoPoint::new(lat, lon),
            radius_km,
            window: TimeWindow::last_minutes(minutes(self.minutes)?),
            limit: limit(self.limit)? as usize,
        })
    }
}

/// Query parameters for strike statistics
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Ingestion counters with the derived success rate
#[derive(Debug, Serialize)]
pub struct IngestionStatsResponse {
    #[serde(flatten)]
    pub stats: IngestionStats,
    pub success_rate: f64,
}

impl From<IngestionStats> for IngestionStatsResponse {
    fn from(stats: IngestionStats) -> Self {
        let success_rate = stats.success_rate();
        Self {
            stats,
            success_rate,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/strikes", get(list_strikes))
        .route("/strikes/recent", get(recent_strikes))
        .route("/strikes/nearby", get(nearby_strikes))
        .route("/strikes/stats", get(strike_stats))
        .route("/ingestion/stats", get(ingestion_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Service name, version and endpoint index
async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Lightning Strike API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/strikes": "Get lightning strikes with filters",
            "/strikes/recent": "Get most recent strikes",
            "/strikes/nearby": "Get strikes near a location",
            "/strikes/stats": "Get strike statistics",
            "/health": "Health check",
            "/ingestion/stats": "Ingestion service statistics"
        }
    }))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let total_strikes = state
        .store
        .count_strikes()
        .await
        .map_err(database_error("Health check failed"))?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "database": "connected",
        "total_strikes": total_strikes
    })))
}

/// List strikes with filtering
#[instrument(skip(state))]
async fn list_strikes(
    State(state): State<AppState>,
    params: Result<Query<StrikeListParams>, QueryRejection>,
) -> ApiResult<Vec<StrikeRecord>> {
    let query = parse_query(params)?.into_query()?;
    metrics::counter!("api.queries", "endpoint" => "strikes").increment(1);

    let strikes = state
        .store
        .query_strikes(&query)
        .await
        .map_err(database_error("Failed to query strikes"))?;

    Ok(Json(strikes))
}

/// Strikes from the last N minutes
#[instrument(skip(state))]
async fn recent_strikes(
    State(state): State<AppState>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> ApiResult<Vec<StrikeRecord>> {
    let params = parse_query(params)?;
    let minutes = minutes(params.minutes)?;
    let limit = limit(params.limit)?;
    metrics::counter!("api.queries", "endpoint" => "recent").increment(1);

    let since = Utc::now() - Duration::minutes(minutes);
    let strikes = state
        .store
        .recent_strikes(since, limit)
        .await
        .map_err(database_error("Failed to query recent strikes"))?;

    Ok(Json(strikes))
}

/// Strikes within a radius of a point, nearest first
#[instrument(skip(state))]
async fn nearby_strikes(
    State(state): State<AppState>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> ApiResult<Vec<NearbyStrike>> {
    let query = parse_query(params)?.into_query()?;
    metrics::counter!("api.queries", "endpoint" => "nearby").increment(1);

    let strikes = find_nearby(state.store.as_ref(), &query)
        .await
        .map_err(database_error("Failed to query nearby strikes"))?;

    Ok(Json(strikes))
}

/// Count, time span and mean position
#[instrument(skip(state))]
async fn strike_stats(
    State(state): State<AppState>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<StrikeStats> {
    let params = parse_query(params)?;
    metrics::counter!("api.queries", "endpoint" => "stats").increment(1);

    let stats = state
        .store
        .strike_stats(&TimeWindow::new(params.since, params.until))
        .await
        .map_err(database_error("Failed to compute strike stats"))?;

    Ok(Json(stats))
}

/// Ingestion counters
async fn ingestion_stats(State(state): State<AppState>) -> ApiResult<IngestionStatsResponse> {
    let stats = state
        .store
        .ingestion_stats()
        .await
        .map_err(database_error("Failed to read ingestion stats"))?;

    match stats {
        Some(stats) => Ok(Json(stats.into())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No ingestion stats found".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )),
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ServerConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = config.listen_addr();

    info!(address = %addr, "Starting strike API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await
        .context("API server error")?;

    Ok(())
}
