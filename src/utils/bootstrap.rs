//! Bootstrap utilities for the notification worker binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing, reading the level from `LOG_LEVEL` (default "info").
///
/// `app_env == "production"` selects JSON formatting for log aggregation;
/// any other value (including the default "development") uses the human
/// readable pretty formatter.
pub fn init_tracing(log_level: &str, app_env: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if app_env == "production" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
