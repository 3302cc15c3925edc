//! Pieces shared between the SPARK bridge and anything that talks to it
//! over Zenoh: the occupancy record model, payload encoding, key layout,
//! configuration sections and session setup.

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod serialization;
pub mod session;
pub mod telemetry;

pub use config::{
    LogFormat, LoggingConfig, SslConfig, ZenohConfig, load_config, load_merged_config,
    parse_config,
};
pub use error::{Error, Result};
pub use keyexpr::{CommandChannel, DeviceKeys, KEY_PREFIX};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::{ConnectOptions, connect};
pub use telemetry::{OccupancyData, OccupancyRecord, TelemetryBatch, format_timestamp};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.level` when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json().flatten_event(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| Error::config(format!("tracing already initialized: {e}")))
}
