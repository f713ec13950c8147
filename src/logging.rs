//! Logging initialization

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize logging from configuration. `RUST_LOG` wins when set; safe to
/// call more than once (later calls are no-ops).
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,sluice={}", config.level)));

    if config.json {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init();
    }
}
