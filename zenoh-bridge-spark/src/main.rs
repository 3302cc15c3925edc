//! Zenoh bridge for SPARK parking occupancy telemetry.
//!
//! Reads occupancy counts from the local SPARK producer socket and publishes
//! them to the platform over Zenoh until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use zenoh_bridge_spark::remote::ZenohRemote;
use zenoh_bridge_spark::shutdown::listen_for_signals;
use zenoh_bridge_spark::{BridgeArgs, ShutdownController, SparkBridgeConfig, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    let config = SparkBridgeConfig::load_from_files(args.configs.as_slice()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            args.configs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    spark_common::init_tracing(&logging).map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.ids.unique_id,
        "Starting zenoh-bridge-spark"
    );

    let shutdown = ShutdownController::new();
    let signals = listen_for_signals(shutdown.clone());

    let remote = ZenohRemote::from_config(&config);
    let supervisor = Supervisor::new(&config, remote, shutdown.clone())?;

    let stats = supervisor.run().await;

    // Stops the signal task if the supervisor returned on its own
    shutdown.request_shutdown();
    if let Err(e) = signals.await {
        tracing::debug!(error = %e, "Signal task ended abnormally");
    }

    tracing::info!(published = stats.published, "Shutdown complete");
    Ok(())
}
