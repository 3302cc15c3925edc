//! Zenoh bridge for SPARK parking occupancy telemetry.
//!
//! The SPARK producer writes `taken,empty` counts to a local socket. This
//! crate keeps a connection to that socket, turns each message into an
//! occupancy record and publishes it to the platform session, surviving
//! producer outages, transport faults and operator shutdown.
//!
//! # Components
//!
//! - [`source`] - producer socket (TCP stream or UDP datagram) with backoff
//! - [`parser`] - `<int>,<int>\n` decoding with configurable field order
//! - [`publisher`] - batch shaping, throttling and bounded sends
//! - [`supervisor`] - session/connection lifecycle and recovery
//! - [`remote`] - platform interface and its Zenoh implementation
//! - [`shutdown`] - process-wide cancellation
//!
//! # Key Expression Format
//!
//! ```text
//! {prefix}/{uniqueId}/telemetry
//! {prefix}/{uniqueId}/@/alive
//! {prefix}/{uniqueId}/@/status
//! {prefix}/{uniqueId}/@/commands/{device,twin,firmware}
//! ```

pub mod args;
pub mod backoff;
pub mod config;
pub mod error;
pub mod parser;
pub mod publisher;
pub mod remote;
pub mod shutdown;
pub mod source;
pub mod supervisor;

pub use args::BridgeArgs;
pub use config::SparkBridgeConfig;
pub use error::{BridgeError, Result};
pub use shutdown::ShutdownController;
pub use supervisor::{BridgeStats, Supervisor};
