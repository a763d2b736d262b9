use std::sync::Arc;

use crate::config::AppConfig;
use crate::external::price_provider::PriceProvider;
use crate::services::fetch_cache::FetchCache;

/// Shared application state handed to every handler.
///
/// The original dashboard kept the logged-in flag, active page and fetched
/// table in implicit session globals; everything a request needs now
/// travels through here and is constructed once, in `main`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub price_provider: Arc<dyn PriceProvider>,
    pub fetch_cache: FetchCache,
}
