use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Annualization convention for volatility and Sharpe.
///
/// The dashboard historically mixed two conventions for what is nominally
/// the same metric: 252 trading days in the risk views and 365 calendar
/// days in the simpler daily views. The factor is therefore an explicit
/// parameter on every metrics request rather than a hidden constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Annualization {
    /// 252 periods per year.
    Trading,
    /// 365 periods per year.
    Calendar,
}

impl Annualization {
    pub fn factor(self) -> f64 {
        match self {
            Annualization::Trading => 252.0,
            Annualization::Calendar => 365.0,
        }
    }
}

impl Default for Annualization {
    fn default() -> Self {
        Annualization::Trading
    }
}

impl std::str::FromStr for Annualization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trading" | "252" => Ok(Annualization::Trading),
            "calendar" | "365" => Ok(Annualization::Calendar),
            other => Err(format!(
                "unknown annualization '{}' (expected 'trading' or 'calendar')",
                other
            )),
        }
    }
}

/// Per-symbol aggregate metrics.
///
/// A `None` marks a value that is undefined for this series (insufficient
/// history, zero benchmark variance, absent benchmark), not a failure.
/// Volatility is a percentage; Sharpe and beta are unitless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub symbol: String,

    /// Number of return observations the aggregates were computed over.
    pub observations: usize,

    /// Annualized volatility of log returns, as a percentage.
    pub volatility: Option<f64>,

    /// Annualized Sharpe ratio (zero risk-free rate).
    pub sharpe: Option<f64>,

    /// Beta against the requested benchmark coin.
    pub beta: Option<f64>,

    /// Time averages of the rolling statistics over the filtered range.
    pub avg_rolling_return_mean: Option<f64>,
    pub avg_rolling_return_std: Option<f64>,
    pub avg_rolling_price_mean: Option<f64>,
    pub avg_rolling_price_std: Option<f64>,
}

/// The aggregation table: one row per symbol, in the order symbols first
/// appear in the filtered input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsTable {
    pub benchmark: String,
    pub annualization: Annualization,
    pub window: usize,
    pub rows: Vec<MetricsRow>,
}

/// Rolling statistics at one date of one symbol's series.
///
/// Entries with fewer than `window` observations behind them are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingPoint {
    pub date: NaiveDate,
    pub price: f64,

    /// Log return from the previous date; `None` on the first observation.
    #[serde(rename = "return")]
    pub ret: Option<f64>,

    pub return_mean: Option<f64>,
    pub return_std: Option<f64>,
    pub price_mean: Option<f64>,
    pub price_std: Option<f64>,
}

/// One row of the derived table persisted to `crypto_metrics.csv`.
///
/// `volatility` and `sharpe` are the symbol-level whole-window aggregates
/// repeated on every row of that symbol, so the file stands alone as a
/// flat join of the return series with the aggregate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub close: f64,

    #[serde(rename = "return")]
    pub ret: Option<f64>,

    pub volatility: Option<f64>,
    pub sharpe: Option<f64>,
}
