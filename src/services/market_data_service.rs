use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::external::price_provider::PriceProvider;
use crate::models::PricePoint;
use crate::services::fetch_cache::FetchCache;
use crate::services::price_store;

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub days: u32,
    pub rows: usize,
    pub symbols_fetched: Vec<String>,
    pub symbols_failed: Vec<String>,
    pub from_cache: bool,
}

impl RefreshSummary {
    fn from_cached(days: u32, rows: &[PricePoint]) -> Self {
        let mut symbols: Vec<String> = Vec::new();
        for row in rows {
            if !symbols.contains(&row.symbol) {
                symbols.push(row.symbol.clone());
            }
        }
        Self {
            days,
            rows: rows.len(),
            symbols_fetched: symbols,
            symbols_failed: Vec::new(),
            from_cache: true,
        }
    }
}

/// Run one fetch cycle: every configured symbol, sequentially, with a
/// fixed pause between provider calls.
///
/// A failing symbol is skipped after the pause; it contributes no rows.
/// Only when every symbol fails does the cycle itself fail, and in that
/// case neither the price file nor the fetch cache is touched. On success
/// the normalized table replaces the price file wholesale and the stale
/// derived file is dropped.
pub async fn refresh_prices(
    config: &AppConfig,
    provider: &dyn PriceProvider,
    cache: &FetchCache,
    days: u32,
    force: bool,
) -> Result<RefreshSummary, AppError> {
    if !config.allowed_lookback_days.contains(&days) {
        return Err(AppError::Validation(format!(
            "lookback of {} days is not supported (choose one of {:?})",
            days, config.allowed_lookback_days
        )));
    }

    if force {
        cache.invalidate(days);
    } else if let Some(rows) = cache.get(days) {
        info!(
            "Serving {}-day refresh from fetch cache ({} rows)",
            days,
            rows.len()
        );
        return Ok(RefreshSummary::from_cached(days, &rows));
    }

    let capped = days.min(provider.max_lookback_days());
    if capped < days {
        warn!(
            "Requested lookback of {} days exceeds the provider maximum; capping at {}",
            days, capped
        );
    }

    let pause = Duration::from_millis(config.fetch_pause_ms);
    let mut all_rows: Vec<PricePoint> = Vec::new();
    let mut fetched: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    for (i, symbol) in config.symbols.iter().enumerate() {
        if i > 0 {
            sleep(pause).await;
        }

        match provider.fetch_daily_history(symbol, capped).await {
            Ok(points) if !points.is_empty() => {
                // One close per date, ascending; the last quote for a day wins.
                let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
                for p in points {
                    if p.price.is_finite() && p.price > 0.0 {
                        by_date.insert(p.date, p.price);
                    }
                }
                if by_date.is_empty() {
                    warn!("✗ No usable prices for {}; skipping", symbol);
                    failed.push(symbol.clone());
                    continue;
                }
                info!("✓ Fetched {} daily prices for {}", by_date.len(), symbol);
                all_rows.extend(
                    by_date
                        .into_iter()
                        .map(|(date, price)| PricePoint::new(date, symbol.clone(), price)),
                );
                fetched.push(symbol.clone());
            }
            Ok(_) => {
                warn!("✗ Provider returned no rows for {}; skipping", symbol);
                failed.push(symbol.clone());
            }
            Err(e) => {
                warn!("✗ Failed to fetch {}: {}; skipping", symbol, e);
                failed.push(symbol.clone());
            }
        }
    }

    if all_rows.is_empty() {
        error!(
            "All {} symbols failed; the price store was left untouched",
            config.symbols.len()
        );
        return Err(AppError::External(
            "no market data fetched: every symbol failed".to_string(),
        ));
    }

    // Stable sort: within a date, rows keep symbol fetch order.
    all_rows.sort_by_key(|r| r.date);

    price_store::write_prices(&config.prices_path(), &all_rows)?;
    drop_stale_derived(config);
    cache.insert(days, all_rows.clone());

    info!(
        "Refreshed {} rows across {}/{} symbols (lookback {} days)",
        all_rows.len(),
        fetched.len(),
        config.symbols.len(),
        days
    );

    Ok(RefreshSummary {
        days,
        rows: all_rows.len(),
        symbols_fetched: fetched,
        symbols_failed: failed,
        from_cache: false,
    })
}

/// The derived table is rebuilt from the price file on demand; once the
/// price file has been replaced it must not be served stale.
fn drop_stale_derived(config: &AppConfig) {
    match std::fs::remove_file(config.derived_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to drop stale derived file: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::price_provider::{PriceProviderError, ProviderPricePoint};
    use crate::models::Annualization;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;

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
            self.histories.get(symbol).cloned().ok_or_else(|| {
                PriceProviderError::BadResponse(format!("status 404 for {}", symbol))
            })
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

    #[tokio::test]
    async fn failing_symbol_is_skipped_but_the_rest_survive() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["bitcoin", "unlistedcoin", "ethereum"]);
        let provider = StubProvider::new(&[
            ("bitcoin", &[100.0, 110.0][..]),
            ("ethereum", &[50.0, 51.0][..]),
        ]);
        let cache = FetchCache::new(60);

        let summary = refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap();

        assert_eq!(summary.symbols_fetched, ["bitcoin", "ethereum"]);
        assert_eq!(summary.symbols_failed, ["unlistedcoin"]);
        assert_eq!(summary.rows, 4);
        assert!(!summary.from_cache);

        let stored = price_store::read_prices(&config.prices_path()).unwrap();
        assert_eq!(stored.len(), 4);
        // Date-major order, symbol fetch order within a date.
        assert_eq!(stored[0].symbol, "bitcoin");
        assert_eq!(stored[1].symbol, "ethereum");
        assert_eq!(stored[0].date, stored[1].date);
    }

    #[tokio::test]
    async fn total_failure_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["ghostcoin", "vaporcoin"]);
        let provider = StubProvider::new(&[]);
        let cache = FetchCache::new(60);

        let err = refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::External(_)));
        assert!(!config.prices_path().exists());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn second_refresh_within_ttl_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["bitcoin"]);
        let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0][..])]);
        let cache = FetchCache::new(3600);

        let first = refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.rows, first.rows);
        assert_eq!(second.symbols_fetched, ["bitcoin"]);
    }

    #[tokio::test]
    async fn force_refresh_invalidates_the_cache_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["bitcoin"]);
        let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0][..])]);
        let cache = FetchCache::new(3600);

        refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap();
        let forced = refresh_prices(&config, &provider, &cache, 30, true)
            .await
            .unwrap();

        assert!(!forced.from_cache);
    }

    #[tokio::test]
    async fn lookback_outside_the_allowed_set_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["bitcoin"]);
        let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0][..])]);
        let cache = FetchCache::new(60);

        let err = refresh_prices(&config, &provider, &cache, 42, false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(!config.prices_path().exists());
    }

    #[tokio::test]
    async fn refresh_drops_the_stale_derived_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &["bitcoin"]);
        let provider = StubProvider::new(&[("bitcoin", &[100.0, 110.0][..])]);
        let cache = FetchCache::new(60);

        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.derived_path(), "stale").unwrap();

        refresh_prices(&config, &provider, &cache, 30, false)
            .await
            .unwrap();

        assert!(!config.derived_path().exists());
    }
}
