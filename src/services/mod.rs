pub mod fetch_cache;
pub mod market_data_service;
pub mod metrics_service;
pub mod price_store;
