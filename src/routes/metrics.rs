use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::{Annualization, DerivedRow, MetricsTable, RollingPoint};
use crate::services::metrics_service::{self, MetricsParams};
use crate::services::price_store;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/summary", get(get_summary))
        .route("/rolling/:symbol", get(get_rolling))
        .route("/derived", get(get_derived))
}

/// Query parameters for the aggregation table.
#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    /// Benchmark coin for beta; defaults to the configured benchmark.
    pub benchmark: Option<String>,

    /// Rolling window length; defaults to the configured window.
    pub window: Option<usize>,

    /// `trading` (252) or `calendar` (365).
    pub annualization: Option<Annualization>,

    /// Comma-separated symbol subset.
    pub symbols: Option<String>,

    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Query parameters for a rolling series.
#[derive(Debug, Deserialize)]
pub struct RollingParams {
    pub window: Option<usize>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /api/metrics/summary
///
/// Compute the per-symbol aggregation table (volatility, Sharpe, beta,
/// time-averaged rolling stats) from the stored price table.
///
/// Example: GET /api/metrics/summary?benchmark=bitcoin&annualization=calendar&from=2024-01-01
pub async fn get_summary(
    State(state): State<AppState>,
    Query(q): Query<SummaryParams>,
) -> Result<Json<MetricsTable>, AppError> {
    let params = MetricsParams {
        benchmark: q
            .benchmark
            .map(|b| b.to_lowercase())
            .unwrap_or_else(|| state.config.benchmark.clone()),
        annualization: q.annualization.unwrap_or(state.config.annualization),
        window: q.window.unwrap_or(state.config.rolling_window),
        symbols: q.symbols.map(parse_symbol_list),
        from: q.from,
        to: q.to,
    };
    validate_window(params.window)?;

    info!(
        "GET /api/metrics/summary - Computing metrics (benchmark={}, window={}, annualization={:?})",
        params.benchmark, params.window, params.annualization
    );

    let rows = price_store::read_prices(&state.config.prices_path())?;
    let table = metrics_service::compute_metrics(&rows, &params)?;
    Ok(Json(table))
}

/// GET /api/metrics/rolling/:symbol
///
/// Rolling mean/std of returns and prices for one symbol.
pub async fn get_rolling(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
    Query(q): Query<RollingParams>,
) -> Result<Json<Vec<RollingPoint>>, AppError> {
    let symbol = symbol.to_lowercase();
    let window = q.window.unwrap_or(state.config.rolling_window);
    validate_window(window)?;

    info!(
        "GET /api/metrics/rolling/{} - Computing rolling stats (window={})",
        symbol, window
    );

    let rows = price_store::read_prices(&state.config.prices_path())?;
    let points = metrics_service::rolling_series(&rows, &symbol, window, q.from, q.to)?;
    Ok(Json(points))
}

/// GET /api/metrics/derived
///
/// The derived per-row table. Served from its CSV cache when the schema
/// matches; otherwise rebuilt from the price table and re-persisted.
pub async fn get_derived(
    State(state): State<AppState>,
) -> Result<Json<Vec<DerivedRow>>, AppError> {
    info!("GET /api/metrics/derived - Reading derived table");

    let derived_path = state.config.derived_path();
    if let Some(rows) = price_store::read_derived(&derived_path)? {
        return Ok(Json(rows));
    }

    info!("Derived table missing or stale; rebuilding from the price file");
    let prices = price_store::read_prices(&state.config.prices_path())?;
    let rows = metrics_service::derived_rows(&prices, state.config.annualization)?;

    if let Err(e) = price_store::write_derived(&derived_path, &rows) {
        warn!("Failed to persist rebuilt derived table: {}", e);
    }
    Ok(Json(rows))
}

fn parse_symbol_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn validate_window(window: usize) -> Result<(), AppError> {
    if window < 2 {
        return Err(AppError::Validation(
            "window must be at least 2 observations".to_string(),
        ));
    }
    Ok(())
}
