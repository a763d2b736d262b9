use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::errors::AppError;
use crate::models::{
    Annualization, DerivedRow, MetricsRow, MetricsTable, PricePoint, RollingPoint,
};

/// Parameters for one metrics computation. All fields get config-derived
/// defaults at the API layer; the engine itself holds no state.
#[derive(Debug, Clone)]
pub struct MetricsParams {
    pub benchmark: String,
    pub annualization: Annualization,
    pub window: usize,

    /// Restrict the table to these symbols. First-appearance order of the
    /// input is kept either way.
    pub symbols: Option<Vec<String>>,

    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// One symbol's series extracted from the flat table, dates strictly
/// ascending.
struct SymbolSeries {
    symbol: String,
    dates: Vec<NaiveDate>,
    prices: Vec<f64>,
}

impl SymbolSeries {
    fn returns(&self) -> Vec<f64> {
        log_returns(&self.prices)
    }

    /// Dates carrying a return, i.e. all but the first observation.
    fn return_dates(&self) -> &[NaiveDate] {
        if self.dates.is_empty() {
            &[]
        } else {
            &self.dates[1..]
        }
    }
}

/// Natural-log returns of consecutive prices. Output length is input
/// length minus one; the first observation has no return and is dropped,
/// never zero-filled.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n-1 denominator), matching the covariance used for
/// beta so the cov/var ratio is internally consistent.
fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0))
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Sample covariance (n-1 denominator) of two equally long series.
fn sample_covariance(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let sum: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mx) * (y - my))
        .sum();
    Some(sum / (xs.len() as f64 - 1.0))
}

/// Annualized volatility of a return series, as a percentage.
///
/// Undefined with fewer than two returns. A constant price series has
/// exactly zero volatility, which is a defined value, not an error.
pub fn annualized_volatility(returns: &[f64], annualization: Annualization) -> Option<f64> {
    let std = sample_std(returns)?;
    Some(std * annualization.factor().sqrt() * 100.0)
}

/// Annualized Sharpe ratio with a zero risk-free rate.
///
/// Undefined when the return standard deviation is zero: a riskless series
/// has no meaningful risk-adjusted return, and the undefined value flows
/// through the output instead of a division by zero.
pub fn sharpe_ratio(returns: &[f64], annualization: Annualization) -> Option<f64> {
    let std = sample_std(returns)?;
    if std < f64::EPSILON {
        return None;
    }
    let factor = annualization.factor();
    let m = mean(returns)?;
    Some((m * factor) / (std * factor.sqrt()))
}

/// Beta of `returns` against `benchmark_returns`, sample covariance over
/// sample variance. The slices must already be date-aligned. Undefined
/// when the benchmark variance is zero.
pub fn beta(returns: &[f64], benchmark_returns: &[f64]) -> Option<f64> {
    let cov = sample_covariance(returns, benchmark_returns)?;
    let var = sample_variance(benchmark_returns)?;
    if var < f64::EPSILON {
        return None;
    }
    Some(cov / var)
}

/// Trailing-window mean and sample std at every index. Entries before
/// index `window - 1` are undefined.
pub fn rolling_mean_std(values: &[f64], window: usize) -> Vec<(Option<f64>, Option<f64>)> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if window == 0 || i + 1 < window {
                (None, None)
            } else {
                let slice = &values[i + 1 - window..=i];
                (mean(slice), sample_std(slice))
            }
        })
        .collect()
}

/// Compute the aggregation table for a normalized price table.
///
/// Fails fast on a malformed table (empty, non-positive prices, duplicate
/// dates per symbol); once validated, individual undefined values flow
/// through as `None` rather than aborting the computation.
pub fn compute_metrics(
    rows: &[PricePoint],
    params: &MetricsParams,
) -> Result<MetricsTable, AppError> {
    validate_table(rows)?;

    let dated = filter_dates(rows, params.from, params.to);
    let filtered = filter_symbols(&dated, params.symbols.as_deref());
    if filtered.is_empty() {
        return Err(AppError::Validation(
            "no rows match the requested filters".to_string(),
        ));
    }

    // The benchmark series comes from the date-filtered table before the
    // symbol subset is applied, so narrowing the displayed symbols does not
    // silently lose beta.
    let bench_returns: Option<BTreeMap<NaiveDate, f64>> = split_by_symbol(&dated)?
        .into_iter()
        .find(|s| s.symbol == params.benchmark)
        .map(|s| returns_by_date(&s));

    let series = split_by_symbol(&filtered)?;
    let mut table_rows = Vec::with_capacity(series.len());

    for s in &series {
        let returns = s.returns();
        let volatility = annualized_volatility(&returns, params.annualization);
        let sharpe = sharpe_ratio(&returns, params.annualization);
        let beta = symbol_beta(s, &returns, params, bench_returns.as_ref());

        let ret_stats = rolling_mean_std(&returns, params.window);
        let price_stats = rolling_mean_std(&s.prices, params.window);

        table_rows.push(MetricsRow {
            symbol: s.symbol.clone(),
            observations: returns.len(),
            volatility,
            sharpe,
            beta,
            avg_rolling_return_mean: average_defined(ret_stats.iter().map(|(m, _)| *m)),
            avg_rolling_return_std: average_defined(ret_stats.iter().map(|(_, sd)| *sd)),
            avg_rolling_price_mean: average_defined(price_stats.iter().map(|(m, _)| *m)),
            avg_rolling_price_std: average_defined(price_stats.iter().map(|(_, sd)| *sd)),
        });
    }

    Ok(MetricsTable {
        benchmark: params.benchmark.clone(),
        annualization: params.annualization,
        window: params.window,
        rows: table_rows,
    })
}

/// Rolling statistics for one symbol over an optional date range.
pub fn rolling_series(
    rows: &[PricePoint],
    symbol: &str,
    window: usize,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<RollingPoint>, AppError> {
    validate_table(rows)?;

    let dated = filter_dates(rows, from, to);
    let series = split_by_symbol(&dated)?
        .into_iter()
        .find(|s| s.symbol == symbol)
        .ok_or_else(|| AppError::NotFound(format!("no price data for symbol {}", symbol)))?;

    Ok(rolling_points(&series, window))
}

/// Flatten the return series and per-symbol whole-window aggregates into
/// the derived table. Row order follows the input table.
pub fn derived_rows(
    rows: &[PricePoint],
    annualization: Annualization,
) -> Result<Vec<DerivedRow>, AppError> {
    validate_table(rows)?;

    struct SymbolAggregates {
        volatility: Option<f64>,
        sharpe: Option<f64>,
        returns: HashMap<NaiveDate, f64>,
    }

    let mut per_symbol: HashMap<String, SymbolAggregates> = HashMap::new();
    for s in split_by_symbol(rows)? {
        let returns = s.returns();
        per_symbol.insert(
            s.symbol.clone(),
            SymbolAggregates {
                volatility: annualized_volatility(&returns, annualization),
                sharpe: sharpe_ratio(&returns, annualization),
                returns: s
                    .return_dates()
                    .iter()
                    .copied()
                    .zip(returns.iter().copied())
                    .collect(),
            },
        );
    }

    Ok(rows
        .iter()
        .map(|r| {
            let aggregates = per_symbol.get(&r.symbol);
            DerivedRow {
                date: r.date,
                symbol: r.symbol.clone(),
                close: r.price,
                ret: aggregates.and_then(|a| a.returns.get(&r.date).copied()),
                volatility: aggregates.and_then(|a| a.volatility),
                sharpe: aggregates.and_then(|a| a.sharpe),
            }
        })
        .collect())
}

fn validate_table(rows: &[PricePoint]) -> Result<(), AppError> {
    if rows.is_empty() {
        return Err(AppError::Validation("price table is empty".to_string()));
    }
    for row in rows {
        if row.symbol.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "price table has a row with an empty symbol on {}",
                row.date
            )));
        }
        if !row.price.is_finite() || row.price <= 0.0 {
            return Err(AppError::Validation(format!(
                "invalid price {} for symbol {} on {}",
                row.price, row.symbol, row.date
            )));
        }
    }
    Ok(())
}

fn filter_dates(
    rows: &[PricePoint],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<PricePoint> {
    rows.iter()
        .filter(|r| from.map_or(true, |d| r.date >= d) && to.map_or(true, |d| r.date <= d))
        .cloned()
        .collect()
}

fn filter_symbols(rows: &[PricePoint], symbols: Option<&[String]>) -> Vec<PricePoint> {
    match symbols {
        None => rows.to_vec(),
        Some(subset) => rows
            .iter()
            .filter(|r| subset.contains(&r.symbol))
            .cloned()
            .collect(),
    }
}

/// Group the flat table into per-symbol series, preserving the order in
/// which symbols first appear. Duplicate dates within a symbol are a
/// validation failure: the fetcher never produces them, so their presence
/// means the persisted table was corrupted.
fn split_by_symbol(rows: &[PricePoint]) -> Result<Vec<SymbolSeries>, AppError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();

    for row in rows {
        if !grouped.contains_key(&row.symbol) {
            order.push(row.symbol.clone());
        }
        grouped
            .entry(row.symbol.clone())
            .or_default()
            .push((row.date, row.price));
    }

    let mut out = Vec::with_capacity(order.len());
    for symbol in order {
        let mut points = grouped.remove(&symbol).unwrap_or_default();
        points.sort_by_key(|(date, _)| *date);

        for pair in points.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(AppError::Validation(format!(
                    "duplicate date {} for symbol {}",
                    pair[0].0, symbol
                )));
            }
        }

        out.push(SymbolSeries {
            symbol,
            dates: points.iter().map(|(date, _)| *date).collect(),
            prices: points.iter().map(|(_, price)| *price).collect(),
        });
    }
    Ok(out)
}

fn returns_by_date(series: &SymbolSeries) -> BTreeMap<NaiveDate, f64> {
    series
        .return_dates()
        .iter()
        .copied()
        .zip(series.returns())
        .collect()
}

fn symbol_beta(
    series: &SymbolSeries,
    returns: &[f64],
    params: &MetricsParams,
    bench_returns: Option<&BTreeMap<NaiveDate, f64>>,
) -> Option<f64> {
    if series.symbol == params.benchmark {
        // The benchmark against itself, by definition.
        return Some(1.0);
    }

    let bench = bench_returns?;
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (date, r) in series.return_dates().iter().zip(returns.iter()) {
        if let Some(b) = bench.get(date) {
            xs.push(*r);
            ys.push(*b);
        }
    }
    beta(&xs, &ys)
}

fn rolling_points(series: &SymbolSeries, window: usize) -> Vec<RollingPoint> {
    let returns = series.returns();
    let ret_stats = rolling_mean_std(&returns, window);
    let price_stats = rolling_mean_std(&series.prices, window);

    (0..series.dates.len())
        .map(|i| RollingPoint {
            date: series.dates[i],
            price: series.prices[i],
            ret: if i == 0 { None } else { Some(returns[i - 1]) },
            return_mean: if i == 0 { None } else { ret_stats[i - 1].0 },
            return_std: if i == 0 { None } else { ret_stats[i - 1].1 },
            price_mean: price_stats[i].0,
            price_std: price_stats[i].1,
        })
        .collect()
}

fn average_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let defined: Vec<f64> = values.flatten().collect();
    mean(&defined)
}
