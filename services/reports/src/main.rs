//! Reports Service - Read-only JSON reports over the country metrics warehouse
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /reports/gdp-population - Latest-year GDP and population snapshot
//! - GET /reports/cost-of-living - Cost of living vs purchasing power by region
//! - GET /reports/climate-development - Climate quality vs GDP over a year range
//! - GET /reports/traffic-commute - GDP per capita by traffic commute tier
//! - GET /reports/rollup - GDP by year and country with subtotals

mod queries;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use country_etl::Warehouse;

const DEFAULT_FROM_YEAR: i32 = 2020;
const DEFAULT_TO_YEAR: i32 = 2025;

// ============================================================================
// State
// ============================================================================

struct AppState {
    warehouse: Warehouse,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct YearRangeQuery {
    from: Option<i32>,
    to: Option<i32>,
}

// ============================================================================
// Handlers
// ============================================================================

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

/// Wrap a report under `key`, or turn a database error into a 500.
fn report<T: Serialize>(key: &str, result: Result<Vec<T>, sqlx::Error>) -> Response {
    match result {
        Ok(rows) => Json(serde_json::json!({ key: rows })).into_response(),
        Err(e) => {
            error!(report = key, error = %e, "report query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn gdp_population_handler(State(state): State<Arc<AppState>>) -> Response {
    report("rows", queries::gdp_population(&state.warehouse).await)
}

async fn cost_of_living_handler(State(state): State<Arc<AppState>>) -> Response {
    report("regions", queries::cost_of_living(&state.warehouse).await)
}

async fn climate_development_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<YearRangeQuery>,
) -> Response {
    let from = params.from.unwrap_or(DEFAULT_FROM_YEAR);
    let to = params.to.unwrap_or(DEFAULT_TO_YEAR);
    if from > to {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("from ({from}) must not be after to ({to})"),
        );
    }
    report(
        "rows",
        queries::climate_development(&state.warehouse, from, to).await,
    )
}

async fn traffic_commute_handler(State(state): State<Arc<AppState>>) -> Response {
    report("categories", queries::traffic_commute(&state.warehouse).await)
}

async fn rollup_handler(State(state): State<Arc<AppState>>) -> Response {
    report("rows", queries::rollup(&state.warehouse).await)
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/reports/gdp-population", get(gdp_population_handler))
        .route("/reports/cost-of-living", get(cost_of_living_handler))
        .route("/reports/climate-development", get(climate_development_handler))
        .route("/reports/traffic-commute", get(traffic_commute_handler))
        .route("/reports/rollup", get(rollup_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("DB_URL"))
        .context("DATABASE_URL env var missing")?;
    let bind = std::env::var("REPORTS_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let warehouse = Warehouse::connect(&db_url, 10)
        .await
        .context("Failed to connect to warehouse")?;
    let app = router(Arc::new(AppState { warehouse }));

    info!(%bind, "reports listening");
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
