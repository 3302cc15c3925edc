//! Zenoh-backed platform session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spark_common::keyexpr::{all_devices_alive_wildcard, device_from_alive_key};
use spark_common::{
    CommandChannel, ConnectOptions, DeviceKeys, Format, SslConfig, TelemetryBatch, ZenohConfig,
    decode_auto, encode,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;

use super::{ConnectionEvent, RemoteClient, RemoteHandlers, RemoteSession, dispatch};
use crate::config::{DeviceIdentity, SparkBridgeConfig};
use crate::error::RemoteError;

/// Upper bound on the startup queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Status document published on `{prefix}/{uniqueId}/@/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device unique id.
    pub device: String,
    /// Bridge version.
    pub version: String,
    /// "running" or "offline".
    pub status: String,
}

impl DeviceStatus {
    pub fn running(device: impl Into<String>) -> Self {
        Self::new(device, "running")
    }

    pub fn offline(device: impl Into<String>) -> Self {
        Self::new(device, "offline")
    }

    fn new(device: impl Into<String>, status: &str) -> Self {
        Self {
            device: device.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: status.to_string(),
        }
    }
}

/// Opens platform sessions over Zenoh.
#[derive(Debug, Clone)]
pub struct ZenohRemote {
    zenoh: ZenohConfig,
    ssl: Option<SslConfig>,
    discovery_url: Option<String>,
    key_prefix: String,
    format: Format,
}

impl ZenohRemote {
    pub fn new(zenoh: ZenohConfig, key_prefix: impl Into<String>) -> Self {
        Self {
            zenoh,
            ssl: None,
            discovery_url: None,
            key_prefix: key_prefix.into(),
            format: Format::default(),
        }
    }

    pub fn from_config(config: &SparkBridgeConfig) -> Self {
        Self::new(config.zenoh.clone(), config.telemetry.key_prefix.clone())
            .with_ssl(config.ssl.clone())
            .with_discovery_url(config.networking.discovery_url.clone())
            .with_format(config.telemetry.format)
    }

    pub fn with_ssl(mut self, ssl: Option<SslConfig>) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_discovery_url(mut self, url: Option<String>) -> Self {
        self.discovery_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    async fn declare(
        &self,
        session: &Session,
        keys: &DeviceKeys,
        handlers: &Arc<dyn RemoteHandlers>,
    ) -> Result<(LivelinessToken, Vec<JoinHandle<()>>), RemoteError> {
        let token = session
            .liveliness()
            .declare_token(keys.alive())
            .await
            .map_err(|e| RemoteError::Open(format!("Failed to declare liveliness token: {}", e)))?;

        let mut tasks = Vec::with_capacity(CommandChannel::ALL.len());
        for channel in CommandChannel::ALL {
            let key = keys.command(channel);
            let subscriber = match session.declare_subscriber(&key).await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    tasks.iter().for_each(JoinHandle::abort);
                    return Err(RemoteError::Open(format!(
                        "Failed to subscribe to {}: {}",
                        key, e
                    )));
                }
            };

            debug!(key = %key, "Command subscriber declared");

            let handlers = Arc::clone(handlers);
            tasks.push(tokio::spawn(async move {
                while let Ok(sample) = subscriber.recv_async().await {
                    let payload = sample.payload().to_bytes();
                    match decode_auto::<Value>(&payload) {
                        Ok(value) => dispatch(handlers.as_ref(), channel, &value),
                        Err(e) => {
                            warn!(
                                key = %sample.key_expr(),
                                error = %e,
                                "Failed to decode command"
                            );
                        }
                    }
                }
            }));
        }

        Ok((token, tasks))
    }
}

impl RemoteClient for ZenohRemote {
    type Session = ZenohSession;

    async fn open(
        &self,
        identity: &DeviceIdentity,
        handlers: Arc<dyn RemoteHandlers>,
    ) -> Result<ZenohSession, RemoteError> {
        let options = ConnectOptions {
            ssl: self.ssl.as_ref(),
            extra_endpoint: self.discovery_url.as_deref(),
        };

        let session = spark_common::connect(&self.zenoh, &options)
            .await
            .map_err(|e| RemoteError::Open(e.to_string()))?;

        let keys = DeviceKeys::new(&self.key_prefix, &identity.unique_id);

        let (token, command_tasks) = match self.declare(&session, &keys, &handlers).await {
            Ok(declared) => declared,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!(error = %close_err, "Error closing half-open session");
                }
                return Err(e);
            }
        };

        let remote = ZenohSession {
            session,
            keys,
            key_prefix: self.key_prefix.clone(),
            unique_id: identity.unique_id.clone(),
            format: self.format,
            handlers,
            token,
            command_tasks,
        };

        remote.publish_status(DeviceStatus::running(&identity.unique_id)).await;
        remote.handlers.on_connection_event(ConnectionEvent::Opened);

        info!(
            device = %identity.unique_id,
            sid = %identity.sid,
            key = %remote.keys.telemetry(),
            format = ?self.format,
            "Platform session open"
        );

        Ok(remote)
    }
}

/// An open Zenoh platform session for one device.
pub struct ZenohSession {
    session: Session,
    keys: DeviceKeys,
    key_prefix: String,
    unique_id: String,
    format: Format,
    handlers: Arc<dyn RemoteHandlers>,
    // Dropping the token undeclares it
    token: LivelinessToken,
    command_tasks: Vec<JoinHandle<()>>,
}

impl ZenohSession {
    /// The underlying Zenoh session.
    pub fn zenoh_session(&self) -> &Session {
        &self.session
    }

    pub fn keys(&self) -> &DeviceKeys {
        &self.keys
    }

    async fn publish_status(&self, status: DeviceStatus) {
        let payload = match encode(&status, self.format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode status");
                return;
            }
        };

        if let Err(e) = self.session.put(self.keys.status(), payload).await {
            warn!(status = %status.status, error = %e, "Failed to publish status");
        }
    }
}

impl RemoteSession for ZenohSession {
    async fn send(&self, batch: &TelemetryBatch) -> Result<(), RemoteError> {
        let payload = encode(batch, self.format)?;
        self.session
            .put(self.keys.telemetry(), payload)
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn fetch_device_list(&self) -> Result<Vec<String>, RemoteError> {
        let replies = self
            .session
            .liveliness()
            .get(all_devices_alive_wildcard(&self.key_prefix))
            .timeout(QUERY_TIMEOUT)
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let mut devices = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    if let Some(device) = device_from_alive_key(sample.key_expr().as_str()) {
                        devices.push(device.to_string());
                    }
                }
                Err(err) => debug!(error = ?err, "Liveliness query error reply"),
            }
        }

        devices.sort();
        devices.dedup();
        Ok(devices)
    }

    async fn fetch_twins(&self) -> Result<Vec<Value>, RemoteError> {
        let replies = self
            .session
            .get(self.keys.twin())
            .timeout(QUERY_TIMEOUT)
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let mut twins = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => match decode_auto::<Value>(&sample.payload().to_bytes()) {
                    Ok(twin) => twins.push(twin),
                    Err(e) => warn!(key = %sample.key_expr(), error = %e, "Failed to decode twin"),
                },
                Err(err) => debug!(error = ?err, "Twin query error reply"),
            }
        }

        Ok(twins)
    }

    async fn close(self) {
        for task in &self.command_tasks {
            task.abort();
        }

        self.publish_status(DeviceStatus::offline(&self.unique_id))
            .await;

        let Self {
            session,
            handlers,
            token,
            ..
        } = self;
        drop(token);

        if let Err(e) = session.close().await {
            warn!(error = %e, "Error closing Zenoh session");
        }

        handlers.on_connection_event(ConnectionEvent::Closed);
        info!("Platform session closed");
    }
}
