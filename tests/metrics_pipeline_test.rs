//! End-to-end pipeline scenarios: stubbed provider -> fetch cycle -> CSV
//! store -> metrics engine.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;

use cryptorisk_backend::config::AppConfig;
use cryptorisk_backend::errors::AppError;
use cryptorisk_backend::external::price_provider::{
    PriceProvider, PriceProviderError, ProviderPricePoint,
};
use cryptorisk_backend::models::Annualization;
use cryptorisk_backend::services::fetch_cache::FetchCache;
use cryptorisk_backend::services::market_data_service;
use cryptorisk_backend::services::metrics_service::{self, MetricsParams};
use cryptorisk_backend::services::price_store;

struct StubProvider {
    histories: HashMap<String, Vec<ProviderPricePoint>>,
}

impl StubProvider {
    fn new(histories: &[(&str, &[f64])]) -> Self {
        let start: NaiveDate = "2024-01-01".parse().unwrap();
        Self {
            histories: histories
                .iter()
                .map(|(symbol, prices)| {
                    let points = prices
                        .iter()
                        .enumerate()
                        .map(|(i, p)| ProviderPricePoint {
                            date: start + chrono::Duration::days(i as i64),
                            price: *p,
                        })
                        .collect();
                    (symbol.to_string(), points)
                })
                .collect(),
        }
    }
}

#[async_trait]
impl PriceProvider for StubProvider {
    async fn fetch_daily_history(
        &self,
        symbol: &str,
        _days: u32,
    ) -> Result<Vec<ProviderPricePoint>, PriceProviderError> {
        self.histories
            .get(symbol)
            .cloned()
            .ok_or_else(|| PriceProviderError::BadResponse(format!("status 404 for {}", symbol)))
    }
}

fn test_config(data_dir: &Path, symbols: &[&str]) -> AppConfig {
    AppConfig {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        benchmark: "bitcoin".to_string(),
        default_lookback_days: 30,
        allowed_lookback_days: vec![7, 14, 30, 90, 180, 365],
        rolling_window: 30,
        annualization: Annualization::Trading,
        data_dir: data_dir.to_path_buf(),
        fetch_pause_ms: 0,
        cache_ttl_secs: 60,
        port: 0,
    }
}

fn default_params(window: usize) -> MetricsParams {
    MetricsParams {
        benchmark: "bitcoin".to_string(),
        annualization: Annualization::Trading,
        window,
        symbols: None,
        from: None,
        to: None,
    }
}

#[tokio::test]
async fn canonical_series_produces_the_expected_volatility() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["bitcoin"]);
    let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0, 99.0][..])]);
    let cache = FetchCache::new(60);

    market_data_service::refresh_prices(&config, &provider, &cache, 30, false)
        .await
        .unwrap();

    let rows = price_store::read_prices(&config.prices_path()).unwrap();
    let table = metrics_service::compute_metrics(&rows, &default_params(2)).unwrap();

    // Direct recomputation: stdev([ln(1.1), ln(0.9)]) * sqrt(252) * 100.
    let r1 = (110.0f64 / 100.0).ln();
    let r2 = (99.0f64 / 110.0).ln();
    let m = (r1 + r2) / 2.0;
    let expected = (((r1 - m).powi(2) + (r2 - m).powi(2)) / 1.0).sqrt() * 252.0f64.sqrt() * 100.0;

    let row = &table.rows[0];
    assert_eq!(row.observations, 2);
    assert!((row.volatility.unwrap() - expected).abs() < 1e-8);
}

#[tokio::test]
async fn total_fetch_failure_leaves_nothing_to_compute_on() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["ghostcoin", "vaporcoin"]);
    let provider = StubProvider::new(&[]);
    let cache = FetchCache::new(60);

    let err = market_data_service::refresh_prices(&config, &provider, &cache, 30, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::External(_)));

    // The caller path must stop here: no price file, so no metrics.
    assert!(matches!(
        price_store::read_prices(&config.prices_path()),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn twin_symbols_agree_on_beta_and_volatility() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["bitcoin", "ethereum"]);
    let series = [100.0, 110.0, 99.0, 104.0, 112.0];
    let provider = StubProvider::new(&[("bitcoin", &series[..]), ("ethereum", &series[..])]);
    let cache = FetchCache::new(60);

    market_data_service::refresh_prices(&config, &provider, &cache, 30, false)
        .await
        .unwrap();
    let rows = price_store::read_prices(&config.prices_path()).unwrap();

    // Beta of each against the other is 1, whichever coin is the benchmark.
    for benchmark in ["bitcoin", "ethereum"] {
        let mut params = default_params(3);
        params.benchmark = benchmark.to_string();
        let table = metrics_service::compute_metrics(&rows, &params).unwrap();

        for row in &table.rows {
            assert!((row.beta.unwrap() - 1.0).abs() < 1e-10, "beta of {}", row.symbol);
        }
        let vols: Vec<f64> = table.rows.iter().map(|r| r.volatility.unwrap()).collect();
        assert!((vols[0] - vols[1]).abs() < 1e-10);
    }
}

#[tokio::test]
async fn schema_mismatch_is_rejected_before_metrics_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["bitcoin"]);

    std::fs::create_dir_all(&config.data_dir).unwrap();
    std::fs::write(
        config.prices_path(),
        "date,symbol\n2024-01-01,bitcoin\n2024-01-02,bitcoin\n",
    )
    .unwrap();

    let err = price_store::read_prices(&config.prices_path()).unwrap_err();
    match err {
        AppError::Validation(msg) => assert!(msg.contains("price")),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn derived_table_is_rebuilt_after_schema_drift() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["bitcoin", "ethereum"]);
    let provider = StubProvider::new(&[
        ("bitcoin", &[100.0, 110.0, 99.0][..]),
        ("ethereum", &[50.0, 51.0, 49.5][..]),
    ]);
    let cache = FetchCache::new(60);

    market_data_service::refresh_prices(&config, &provider, &cache, 30, false)
        .await
        .unwrap();
    let rows = price_store::read_prices(&config.prices_path()).unwrap();

    let derived = metrics_service::derived_rows(&rows, Annualization::Trading).unwrap();
    price_store::write_derived(&config.derived_path(), &derived).unwrap();
    assert!(price_store::read_derived(&config.derived_path())
        .unwrap()
        .is_some());

    // An older derived file with a different layout must not be served.
    std::fs::write(config.derived_path(), "date,symbol,price\n2024-01-01,bitcoin,1\n").unwrap();
    assert!(price_store::read_derived(&config.derived_path())
        .unwrap()
        .is_none());

    let rebuilt = metrics_service::derived_rows(&rows, Annualization::Trading).unwrap();
    assert_eq!(rebuilt, derived);
    assert_eq!(rebuilt.len(), rows.len());
}

#[tokio::test]
async fn both_annualization_conventions_are_reachable() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["bitcoin"]);
    let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0, 99.0, 104.0][..])]);
    let cache = FetchCache::new(60);

    market_data_service::refresh_prices(&config, &provider, &cache, 30, false)
        .await
        .unwrap();
    let rows = price_store::read_prices(&config.prices_path()).unwrap();

    let mut trading = default_params(3);
    trading.annualization = Annualization::Trading;
    let mut calendar = default_params(3);
    calendar.annualization = Annualization::Calendar;

    let vol_trading = metrics_service::compute_metrics(&rows, &trading).unwrap().rows[0]
        .volatility
        .unwrap();
    let vol_calendar = metrics_service::compute_metrics(&rows, &calendar).unwrap().rows[0]
        .volatility
        .unwrap();

    assert!(vol_calendar > vol_trading);
    assert!((vol_calendar / vol_trading - (365.0f64 / 252.0).sqrt()).abs() < 1e-10);
}
