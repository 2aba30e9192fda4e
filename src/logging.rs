use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// `RUST_LOG` wins over the configured level. Production logs are JSON lines.
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}
