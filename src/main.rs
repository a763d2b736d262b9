use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use cryptorisk_backend::app;
use cryptorisk_backend::config::AppConfig;
use cryptorisk_backend::external::coingecko::CoinGeckoProvider;
use cryptorisk_backend::logging::{init_logging, LoggingConfig};
use cryptorisk_backend::services::fetch_cache::FetchCache;
use cryptorisk_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(&LoggingConfig::from_env());

    let config = AppConfig::from_env();
    config.validate().map_err(anyhow::Error::msg)?;
    tracing::info!(
        "📊 Tracking {} coins (benchmark: {})",
        config.symbols.len(),
        config.benchmark
    );

    let state = AppState {
        fetch_cache: FetchCache::new(config.cache_ttl_secs),
        price_provider: Arc::new(CoinGeckoProvider::from_env()),
        config: Arc::new(config.clone()),
    };
    let app = app::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Crypto risk backend running at http://{}/", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
