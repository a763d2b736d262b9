use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Console logging configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

pub fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
