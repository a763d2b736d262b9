use std::path::PathBuf;
use std::str::FromStr;

use crate::models::Annualization;

const DEFAULT_SYMBOLS: &str = "bitcoin,ethereum,solana,cardano,dogecoin";

/// Runtime configuration, resolved once at startup from the environment.
///
/// Everything a request handler needs travels through here (via `AppState`);
/// there are no implicit globals.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Coin identifiers fetched on every refresh, in fetch order.
    pub symbols: Vec<String>,

    /// Benchmark coin for beta calculations.
    pub benchmark: String,

    /// Lookback used when a refresh request does not name one.
    pub default_lookback_days: u32,

    /// Lookback lengths a caller may request.
    pub allowed_lookback_days: Vec<u32>,

    /// Trailing window length for rolling statistics.
    pub rolling_window: usize,

    /// Default annualization convention for volatility and Sharpe.
    pub annualization: Annualization,

    /// Directory holding the price and derived CSV files.
    pub data_dir: PathBuf,

    /// Fixed pause between successive provider calls, in milliseconds.
    pub fetch_pause_ms: u64,

    /// Time-to-live of the in-memory fetch cache, in seconds.
    pub cache_ttl_secs: i64,

    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            symbols: std::env::var("CRYPTO_SYMBOLS")
                .unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            benchmark: std::env::var("BENCHMARK_SYMBOL")
                .unwrap_or_else(|_| "bitcoin".to_string())
                .to_lowercase(),
            default_lookback_days: env_or("DEFAULT_LOOKBACK_DAYS", 30),
            allowed_lookback_days: vec![7, 14, 30, 90, 180, 365],
            rolling_window: env_or("ROLLING_WINDOW", 30),
            annualization: std::env::var("ANNUALIZATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            ),
            fetch_pause_ms: env_or("FETCH_PAUSE_MS", 1500),
            cache_ttl_secs: env_or("FETCH_CACHE_TTL_SECS", 60),
            port: env_or("PORT", 3000),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("CRYPTO_SYMBOLS must name at least one coin".to_string());
        }
        if !self.allowed_lookback_days.contains(&self.default_lookback_days) {
            return Err(format!(
                "DEFAULT_LOOKBACK_DAYS ({}) is not one of the allowed lookbacks {:?}",
                self.default_lookback_days, self.allowed_lookback_days
            ));
        }
        if self.rolling_window < 2 {
            return Err("ROLLING_WINDOW must be at least 2".to_string());
        }
        Ok(())
    }

    /// Location of the normalized price table.
    pub fn prices_path(&self) -> PathBuf {
        self.data_dir.join("crypto_prices.csv")
    }

    /// Location of the derived per-row metrics table.
    pub fn derived_path(&self) -> PathBuf {
        self.data_dir.join("crypto_metrics.csv")
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
