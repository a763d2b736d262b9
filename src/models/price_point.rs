use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// One daily quote for one coin. Uniquely identified by (symbol, date)
// once the fetcher has normalized the provider output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub symbol: String,
    pub price: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, symbol: impl Into<String>, price: f64) -> Self {
        Self {
            date,
            symbol: symbol.into(),
            price,
        }
    }
}
