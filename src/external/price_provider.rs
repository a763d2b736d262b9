use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// A single (date, close) sample as returned by a provider, before
/// normalization into the price table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Fetch up to `days` daily closes for one symbol, ascending by date.
    async fn fetch_daily_history(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<Vec<ProviderPricePoint>, PriceProviderError>;

    /// The longest lookback this provider will serve. Requests beyond it
    /// are capped by the fetcher.
    fn max_lookback_days(&self) -> u32 {
        365
    }
}
