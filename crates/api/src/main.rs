//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use checkout::{LogNotifier, NotificationQueue, spawn_sweeper};
use domain::OrderNumberGenerator;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const NOTIFICATION_QUEUE_CAPACITY: usize = 1024;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the order store and serve
    let numbers = OrderNumberGenerator::new(config.order_number_prefix.clone());
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresOrderStore::with_order_numbers(pool, numbers);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres order store");
            serve(store, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set; orders are kept in memory");
            serve(
                InMemoryOrderStore::with_order_numbers(numbers),
                config,
                metrics_handle,
            )
            .await;
        }
    }
}

async fn serve<S: OrderStore + 'static>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    // 4. Background workers
    let (queue, notifier) =
        NotificationQueue::spawn(Arc::new(LogNotifier), NOTIFICATION_QUEUE_CAPACITY);
    let state = api::create_default_state(store, &config, Some(queue))
        .expect("failed to configure payment gateways");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(
        state.coordinator.pending().clone(),
        config.sweep_interval,
        shutdown_rx,
    );

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop background workers; the notification worker drains once the
    // router, and with it the last queue handle, is gone.
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task failed");
    }
    if let Err(e) = notifier.await {
        tracing::warn!(error = %e, "notification worker failed");
    }

    tracing::info!("server shut down gracefully");
}
