//! afp-api - Read surface + pipeline composition root
//!
//! Starts the full system in one process: broker, feature store, the
//! read-surface cache, the pipeline actors, and the HTTP API. The wiring
//! order here is the subscription-ordering guard: everything that
//! consumes a fan-out topic (cache, classifier, writer) is registered
//! before the sensor or extractor publish anything.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use afp_api::{api, build_router, AppState, RecentCache};
use afp_common::config::{BackendKind, Config};
use afp_engine::{runtime, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "afp-api", about = "Audio feature pipeline read surface")]
struct Args {
    /// Path to the TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5800
    #[arg(long)]
    bind: Option<String>,

    /// Broker backend: memory or sqlite
    #[arg(long)]
    broker: Option<BackendKind>,

    /// Store backend: memory or sqlite
    #[arg(long)]
    store: Option<BackendKind>,

    /// Database file for the sqlite backends
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting AFP Read Surface (afp-api) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(broker) = args.broker {
        config.broker_backend = broker;
    }
    if let Some(store) = args.store {
        config.store_backend = store;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let broker = afp_common::broker::build(&config).await?;
    let store = afp_common::db::build(&config).await?;

    // Cache first, pipeline second: all fan-out subscriptions exist
    // before the first publish.
    let cache = Arc::new(RecentCache::subscribe(broker.as_ref(), config.cache_window()).await?);
    let pipeline = Pipeline::assemble(broker, store.clone(), config.sensor_id.clone()).await?;

    let limiter =
        api::ratelimit::build_limiter(config.rate_limit_max, config.rate_limit_window_secs)?;
    let state = AppState::new(store, cache, config.api_tokens.clone(), limiter);
    let app = build_router(state);

    let token = CancellationToken::new();
    let handles = runtime::spawn_all(pipeline, &config, &token);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("afp-api listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    let shutdown = token.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    })
    .await?;

    info!("Shutting down pipeline");
    token.cancel();
    for handle in handles {
        handle.await?;
    }

    Ok(())
}
