use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::PricePoint;
use crate::services::market_data_service::{self, RefreshSummary};
use crate::services::price_store;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_prices))
        .route("/refresh", post(refresh_prices))
        .route("/:symbol", get(get_symbol_prices))
}

/// Query parameters for a refresh cycle.
#[derive(Debug, Deserialize)]
pub struct RefreshParams {
    /// Lookback in days; must be one of the configured allowed values.
    pub days: Option<u32>,

    /// Invalidate the in-memory fetch cache before fetching.
    #[serde(default)]
    pub force: bool,
}

/// POST /api/prices/refresh?days=30&force=false
///
/// Run one fetch cycle over the configured symbols and replace the stored
/// price table. Symbols that fail are skipped; the call only fails when
/// every symbol does.
pub async fn refresh_prices(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> Result<Json<RefreshSummary>, AppError> {
    let days = params.days.unwrap_or(state.config.default_lookback_days);

    info!(
        "POST /api/prices/refresh - Refreshing prices (days={}, force={})",
        days, params.force
    );

    let summary = market_data_service::refresh_prices(
        &state.config,
        state.price_provider.as_ref(),
        &state.fetch_cache,
        days,
        params.force,
    )
    .await
    .map_err(|e| {
        match &e {
            AppError::RateLimited => warn!("Rate limited while refreshing prices"),
            _ => error!("Refresh failed: {}", e),
        }
        e
    })?;

    Ok(Json(summary))
}

/// GET /api/prices
pub async fn get_prices(
    State(state): State<AppState>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    info!("GET /api/prices - Reading stored price table");
    let rows = price_store::read_prices(&state.config.prices_path())?;
    Ok(Json(rows))
}

/// GET /api/prices/:symbol
pub async fn get_symbol_prices(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    info!("GET /api/prices/{} - Reading stored series", symbol);
    let symbol = symbol.to_lowercase();

    let rows = price_store::read_prices(&state.config.prices_path())?;
    let series: Vec<PricePoint> = rows.into_iter().filter(|r| r.symbol == symbol).collect();

    if series.is_empty() {
        return Err(AppError::NotFound(format!(
            "no price data for symbol {}",
            symbol
        )));
    }
    Ok(Json(series))
}
