//! afp-engine - Headless pipeline runner
//!
//! Runs the sensor, both stages, and the writer against one broker with no
//! HTTP surface. Useful for soak runs and for driving a durable broker
//! that a separately started read surface consumes.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use afp_common::config::{BackendKind, Config};
use afp_engine::runtime;
use afp_engine::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "afp-engine", about = "Audio feature pipeline runner")]
struct Args {
    /// Path to the TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker backend: memory or sqlite
    #[arg(long)]
    broker: Option<BackendKind>,

    /// Store backend: memory or sqlite
    #[arg(long)]
    store: Option<BackendKind>,

    /// Database file for the sqlite backends
    #[arg(long)]
    database: Option<PathBuf>,

    /// Sensor identifier for published audio messages
    #[arg(long)]
    sensor_id: Option<String>,
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
        "Starting AFP Engine (afp-engine) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(broker) = args.broker {
        config.broker_backend = broker;
    }
    if let Some(store) = args.store {
        config.store_backend = store;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(sensor_id) = args.sensor_id {
        config.sensor_id = sensor_id;
    }

    let broker = afp_common::broker::build(&config).await?;
    let store = afp_common::db::build(&config).await?;
    let pipeline = Pipeline::assemble(broker, store, config.sensor_id.clone()).await?;

    let token = CancellationToken::new();
    let handles = runtime::spawn_all(pipeline, &config, &token);
    info!("Pipeline running; Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down pipeline");
    token.cancel();
    for handle in handles {
        handle.await?;
    }

    Ok(())
}
