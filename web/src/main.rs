//! Flash-sale HTTP server.
//!
//! Reads configuration from the environment (and `.env`), connects Redis and
//! `PostgreSQL`, runs migrations, builds the existence filter, starts the
//! reservation sweeper and serves until Ctrl+C or SIGTERM.

use anyhow::Context;
use flashsale_core::environment::SystemClock;
use flashsale_core::store::SharedStore;
use flashsale_postgres::PostgresStore;
use flashsale_redis::RedisSharedStore;
use flashsale_runtime::metrics::MetricsRecorder;
use flashsale_runtime::{Config, FlashSale};
use flashsale_web::{AppState, SharedStoreProbe, router};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        address = %config.server_address(),
        guard_mode = ?config.reservation.guard_mode,
        refill_mode = ?config.cache.refill_mode,
        "Starting flash-sale server"
    );

    let metrics = MetricsRecorder::install()?;

    let redis = RedisSharedStore::new(&config.redis.url).await?;
    redis.preload_scripts().await?;
    let shared: Arc<dyn SharedStore> = Arc::new(redis);
    info!("Redis connected");

    let durable = PostgresStore::connect(
        &config.postgres.url,
        config.postgres.max_connections,
        config.postgres.min_connections,
        config.postgres.connect_timeout,
    )
    .await?;
    durable.migrate().await?;
    let durable = Arc::new(durable);
    info!("PostgreSQL connected and migrated");

    let flash_sale = FlashSale::new(
        &config,
        Arc::clone(&shared),
        durable.clone(),
        durable.clone(),
        Arc::new(SystemClock),
    );

    match flash_sale.maintenance().rebuild_filter_from_catalog().await {
        Ok(count) => info!(products = count, "Existence filter built"),
        Err(e) => warn!(error = %e, "Existence filter not built; lookups are unfiltered"),
    }

    let sweeper = flash_sale.start_sweeper();

    let state = AppState::new(flash_sale)
        .with_metrics(metrics)
        .with_probe(Arc::new(SharedStoreProbe::new("redis", shared)))
        .with_probe(durable);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.server_address()).await?;
    info!(address = %config.server_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for reservation sweeper to stop");
    if tokio::time::timeout(config.server.shutdown_timeout, sweeper.shutdown())
        .await
        .is_err()
    {
        warn!("Sweeper did not stop within the shutdown budget");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashsale=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
