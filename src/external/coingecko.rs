use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::external::price_provider::{PriceProvider, PriceProviderError, ProviderPricePoint};

/// Daily history served by the public CoinGecko tier tops out at one year.
pub const MAX_LOOKBACK_DAYS: u32 = 365;

/// Client for the public CoinGecko market-data API.
///
/// Uses `GET /api/v3/coins/{id}/market_chart` with `vs_currency=usd`,
/// `days=N` and `interval=daily`. An optional demo API key is sent via the
/// `x-cg-demo-api-key` header when `COINGECKO_API_KEY` is set.
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            "https://api.coingecko.com",
            std::env::var("COINGECKO_API_KEY").ok(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    /// `[[ms_epoch, price], ...]`, ascending by timestamp.
    prices: Vec<(f64, f64)>,
}

/// Collapse raw chart samples to one close per calendar date.
///
/// The current partial day arrives as a trailing sample that can share a
/// date with the previous daily close; the last quote for a date wins.
fn to_daily_points(
    samples: Vec<(f64, f64)>,
) -> Result<Vec<ProviderPricePoint>, PriceProviderError> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (ts_ms, price) in samples {
        let date = DateTime::from_timestamp_millis(ts_ms as i64)
            .ok_or_else(|| PriceProviderError::Parse(format!("bad timestamp {}", ts_ms)))?
            .date_naive();
        by_date.insert(date, price);
    }

    Ok(by_date
        .into_iter()
        .map(|(date, price)| ProviderPricePoint { date, price })
        .collect())
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    async fn fetch_daily_history(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<Vec<ProviderPricePoint>, PriceProviderError> {
        let days = days.min(MAX_LOOKBACK_DAYS);
        let days_param = days.to_string();
        let url = format!("{}/api/v3/coins/{}/market_chart", self.base_url, symbol);

        let mut request = self.client.get(&url).query(&[
            ("vs_currency", "usd"),
            ("days", days_param.as_str()),
            ("interval", "daily"),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(PriceProviderError::BadResponse(format!(
                "status {} for {}",
                resp.status(),
                symbol
            )));
        }

        let body = resp
            .json::<MarketChartResponse>()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        to_daily_points(body.prices)
    }

    fn max_lookback_days(&self) -> u32 {
        MAX_LOOKBACK_DAYS
    }
}
