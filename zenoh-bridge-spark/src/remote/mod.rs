//! Interface to the remote platform.
//!
//! The supervisor only sees three capabilities:
//!
//! - [`RemoteClient`] opens a session for a device identity
//! - [`RemoteSession`] sends batches, answers the startup queries, and closes
//! - [`RemoteHandlers`] receives inbound commands and connection events
//!
//! [`ZenohRemote`] is the production implementation.

mod zenoh;

pub use self::zenoh::{DeviceStatus, ZenohRemote, ZenohSession};

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use spark_common::{CommandChannel, TelemetryBatch};
use tracing::info;

use crate::config::DeviceIdentity;
use crate::error::RemoteError;

/// Session lifecycle events reported to [`RemoteHandlers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Callbacks for inbound platform traffic.
///
/// Implementations are called from transport tasks and must not block.
/// Every method defaults to logging the event.
pub trait RemoteHandlers: Send + Sync {
    fn on_command(&self, command: &Value) {
        info!(command = %command, "Device command received");
    }

    fn on_twin_change(&self, twin: &Value) {
        info!(twin = %twin, "Twin change received");
    }

    fn on_firmware_command(&self, command: &Value) {
        info!(command = %command, "Firmware command received");
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        info!(event = %event, "Platform connection event");
    }
}

/// Handlers that only log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandlers;

impl RemoteHandlers for LoggingHandlers {}

/// Route a decoded command payload to the matching handler.
pub fn dispatch(handlers: &dyn RemoteHandlers, channel: CommandChannel, payload: &Value) {
    match channel {
        CommandChannel::Device => handlers.on_command(payload),
        CommandChannel::Twin => handlers.on_twin_change(payload),
        CommandChannel::Firmware => handlers.on_firmware_command(payload),
    }
}

/// Factory for platform sessions.
pub trait RemoteClient: Send + Sync {
    type Session: RemoteSession;

    /// Open a session for `identity`, wiring `handlers` to inbound traffic.
    fn open(
        &self,
        identity: &DeviceIdentity,
        handlers: Arc<dyn RemoteHandlers>,
    ) -> impl Future<Output = Result<Self::Session, RemoteError>> + Send;
}

/// An open platform session.
pub trait RemoteSession: Send + Sync {
    /// Deliver one telemetry batch.
    fn send(&self, batch: &TelemetryBatch) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Devices currently known to the platform.
    fn fetch_device_list(&self) -> impl Future<Output = Result<Vec<String>, RemoteError>> + Send;

    /// Current twin documents for this device.
    fn fetch_twins(&self) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;

    /// Close the session and release its resources.
    fn close(self) -> impl Future<Output = ()> + Send;
}
