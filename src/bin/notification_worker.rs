//! notification-worker: consumes subscription-match envelopes and fans
//! them out to persisted notifications, email, and realtime delivery.
//!
//! ## Architecture
//! ```text
//! [Pub/Sub subscription] -> [IngestionController] -> [Postgres notifications]
//!                                   |                        |
//!                                   v                        v
//!                           [DLQ topic on error]      [email/realtime topics]
//! ```
//!
//! The HTTP diagnostics surface (`/health`, `/ready`, `/status`,
//! `/metrics`, `/diagnostics`) runs alongside the subscribe loop and
//! never gates it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use notification_worker::bus::{BrokerAdapter, PubSubBroker};
use notification_worker::config::Config;
use notification_worker::http::{self, AppState};
use notification_worker::ingestion::{IngestionController, IngestionMetrics, IngestionTopics};
use notification_worker::processors::ProcessorRegistry;
use notification_worker::status::ServiceStatus;
use notification_worker::storage::{NotificationStore, PostgresStore};
use notification_worker::users::{PostgresUserDirectory, UserDirectory};
use notification_worker::utils::bootstrap;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load().map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        e
    })?;

    bootstrap::init_tracing(&config.server.log_level, &config.server.app_env);

    info!("starting notification-worker");

    let status = Arc::new(ServiceStatus::new());
    let metrics = Arc::new(IngestionMetrics::new());
    let registry = ProcessorRegistry::new();
    info!(processors = ?registry.registered_tags(), "processor registry populated");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.connection_string())
        .await
        .map_err(|e| {
            error!(error = %e, "failed to connect to database");
            e
        })?;
    status.set_db_active(true);

    let store: Arc<dyn NotificationStore> = Arc::new(PostgresStore::new(pool.clone()));
    let directory: Arc<dyn UserDirectory> = Arc::new(PostgresUserDirectory::new(pool));

    let broker: Arc<dyn BrokerAdapter> = Arc::new(PubSubBroker::new().await.map_err(|e| {
        error!(error = %e, "failed to connect to pub/sub");
        e
    })?);
    status.set_broker_active(true);

    let controller = Arc::new(IngestionController::new(
        broker.clone(),
        store,
        directory,
        registry.clone(),
        status.clone(),
        metrics.clone(),
        IngestionTopics {
            dlq: config.broker.dlq_topic.clone(),
            email_immediate: config.broker.email_immediate_topic.clone(),
            email_daily: config.broker.email_daily_topic.clone(),
            realtime: config.broker.realtime_topic.clone(),
        },
        config.ingestion.deduplication_window_minutes,
        Duration::from_secs(config.ingestion.message_deadline_secs),
        config.broker.max_concurrency,
    ));

    let subscription = config.broker.pubsub_subscription.clone();
    let ingestion_handle = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run("notification-matches", &subscription).await {
                error!(error = %e, "ingestion subscribe loop exited");
            }
        })
    };

    let app_state = AppState {
        status: status.clone(),
        metrics: metrics.clone(),
        registry,
    };
    let app = http::router(app_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    info!(port = config.server.port, "diagnostics surface listening");
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "http server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining");

    ingestion_handle.abort();
    http_handle.abort();
    broker.close().await;

    let grace = Duration::from_secs(config.ingestion.shutdown_grace_secs);
    tokio::time::sleep(grace.min(Duration::from_millis(100))).await;

    info!("notification-worker stopped");
    Ok(())
}
