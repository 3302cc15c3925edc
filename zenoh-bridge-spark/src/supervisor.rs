//! The bridge supervisor.
//!
//! ```text
//! Idle -> EstablishingRemote -> EstablishingSource -> Streaming
//!   ^            |                     ^                 |
//!   |            v                     |                 v
//!   +------- Recovering <--------------+-----------------+
//!
//! any state -> ShuttingDown (on shutdown request)
//! ```
//!
//! The outer loop owns the platform session, the inner loop owns the
//! producer connection. Both are closed on every exit path before the
//! supervisor waits or returns.
//!
//! The remote backoff only grows on platform failures. A cycle ended by the
//! producer resets it first, so a flapping producer waits the minimum delay
//! before the session is reopened. With [`RecoveryScope::Source`] the
//! producer is reconnected after a delay from its own recovery backoff,
//! which resets once a message parses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::{DeviceIdentity, RecoveryScope, SparkBridgeConfig};
use crate::error::{RemoteError, Result, SourceError};
use crate::parser::ReadingParser;
use crate::publisher::{PublishOutcome, TelemetryPublisher};
use crate::remote::{LoggingHandlers, RemoteClient, RemoteHandlers, RemoteSession};
use crate::shutdown::{ShutdownController, WaitOutcome};
use crate::source::{Connection, SourceConnector, SourceSettings};

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    EstablishingRemote,
    EstablishingSource,
    Streaming,
    Recovering,
    ShuttingDown,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::EstablishingRemote => "establishing_remote",
            Self::EstablishingSource => "establishing_source",
            Self::Streaming => "streaming",
            Self::Recovering => "recovering",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Counters kept for the lifetime of the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Messages that parsed into a reading.
    pub readings: u64,
    /// Batches accepted by the platform.
    pub published: u64,
    /// Readings dropped by the transmit interval.
    pub throttled: u64,
    /// Messages dropped as malformed.
    pub parse_errors: u64,
    /// Producer connections lost.
    pub source_failures: u64,
    /// Readings dropped because the send failed.
    pub publish_failures: u64,
    /// Platform sessions opened.
    pub session_opens: u64,
    /// Platform session attempts that failed.
    pub session_failures: u64,
}

impl BridgeStats {
    pub fn log(&self) {
        info!(
            readings = self.readings,
            published = self.published,
            throttled = self.throttled,
            parse_errors = self.parse_errors,
            source_failures = self.source_failures,
            publish_failures = self.publish_failures,
            session_opens = self.session_opens,
            session_failures = self.session_failures,
            "Bridge statistics"
        );
    }
}

/// Why a session cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Shutdown,
    SourceFailed,
    RemoteFailed,
}

/// Why streaming on one producer connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    SourceFailed,
    PublishFailed,
}

/// Drives the bridge until shutdown.
pub struct Supervisor<R: RemoteClient> {
    remote: R,
    identity: DeviceIdentity,
    handlers: Arc<dyn RemoteHandlers>,
    source: SourceConnector,
    parser: ReadingParser,
    publisher: TelemetryPublisher,
    shutdown: ShutdownController,
    scope: RecoveryScope,
    open_timeout: Duration,
    remote_backoff: Backoff,
    source_recovery: Backoff,
    state: SupervisorState,
    stats: BridgeStats,
}

impl<R: RemoteClient> Supervisor<R> {
    pub fn new(config: &SparkBridgeConfig, remote: R, shutdown: ShutdownController) -> Result<Self> {
        let settings = SourceSettings::from_config(config)?;

        Ok(Self {
            remote,
            identity: config.ids.clone(),
            handlers: Arc::new(LoggingHandlers),
            source: SourceConnector::new(settings, shutdown.clone()),
            parser: ReadingParser::new(config.source.field_order),
            publisher: TelemetryPublisher::from_config(config),
            shutdown,
            scope: config.recovery.scope,
            open_timeout: Duration::from_millis(config.recovery.open_timeout_ms),
            remote_backoff: Backoff::from(config.recovery.backoff),
            source_recovery: Backoff::from(config.source.backoff),
            state: SupervisorState::Idle,
            stats: BridgeStats::default(),
        })
    }

    /// Replace the logging handlers for inbound platform traffic.
    pub fn with_handlers(mut self, handlers: Arc<dyn RemoteHandlers>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Run until shutdown is requested, then return the final counters.
    pub async fn run(mut self) -> BridgeStats {
        info!(
            device = %self.identity.unique_id,
            endpoint = %self.source.settings().endpoint(),
            mode = %self.source.settings().mode,
            field_order = %self.parser.order(),
            recovery_scope = ?self.scope,
            "SPARK bridge starting"
        );

        loop {
            if self.shutdown.is_shutdown_requested() {
                break;
            }

            self.transition(SupervisorState::EstablishingRemote);
            let session = match self.establish_remote().await {
                Ok(Some(session)) => session,
                Ok(None) => break,
                Err(e) => {
                    self.stats.session_failures += 1;
                    warn!(error = %e, "Platform session unavailable");
                    self.transition(SupervisorState::Recovering);
                    if self.wait_before_reopen().await == WaitOutcome::Shutdown {
                        break;
                    }
                    self.transition(SupervisorState::Idle);
                    continue;
                }
            };

            let end = self.run_cycle(&session).await;

            if end != CycleEnd::Shutdown {
                self.transition(SupervisorState::Recovering);
            }
            session.close().await;

            match end {
                CycleEnd::Shutdown => break,
                CycleEnd::SourceFailed => self.remote_backoff.reset(),
                CycleEnd::RemoteFailed => {}
            }
            if self.wait_before_reopen().await == WaitOutcome::Shutdown {
                break;
            }
            self.transition(SupervisorState::Idle);
        }

        self.transition(SupervisorState::ShuttingDown);
        self.stats.log();
        info!("SPARK bridge stopped");
        self.stats
    }

    /// Open the platform session and run the startup queries.
    ///
    /// `Ok(None)` means shutdown was requested while waiting.
    async fn establish_remote(&mut self) -> std::result::Result<Option<R::Session>, RemoteError> {
        let open = self.remote.open(&self.identity, Arc::clone(&self.handlers));

        let opened = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = tokio::time::timeout(self.open_timeout, open) => Some(result),
        };

        let session = match opened {
            None => return Ok(None),
            Some(Err(_)) => {
                return Err(RemoteError::Open(format!(
                    "timed out after {:?}",
                    self.open_timeout
                )));
            }
            Some(Ok(result)) => result?,
        };

        self.stats.session_opens += 1;

        let startup = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = tokio::time::timeout(self.open_timeout, startup_queries(&session)) => Some(result),
        };

        match startup {
            None => {
                session.close().await;
                Ok(None)
            }
            Some(Err(_)) => {
                session.close().await;
                Err(RemoteError::Transport(format!(
                    "startup queries timed out after {:?}",
                    self.open_timeout
                )))
            }
            Some(Ok(Err(e))) => {
                session.close().await;
                Err(e)
            }
            Some(Ok(Ok((devices, twins)))) => {
                info!(
                    devices = devices.len(),
                    twins = twins.len(),
                    "Platform state fetched"
                );
                debug!(devices = ?devices, "Known devices");
                Ok(Some(session))
            }
        }
    }

    /// Connect the producer and stream until a failure ends the cycle.
    async fn run_cycle(&mut self, session: &R::Session) -> CycleEnd {
        let mut published = false;

        loop {
            self.transition(SupervisorState::EstablishingSource);
            let mut conn = match self.source.connect().await {
                Ok(conn) => conn,
                Err(SourceError::Cancelled) => return CycleEnd::Shutdown,
                Err(SourceError::Connection(e)) => {
                    self.stats.source_failures += 1;
                    warn!(error = %e, kind = e.kind(), "Producer connection failed");
                    return CycleEnd::SourceFailed;
                }
            };

            self.transition(SupervisorState::Streaming);
            let end = self.stream(session, &mut conn, &mut published).await;
            self.source.close(conn).await;

            match end {
                StreamEnd::Shutdown => return CycleEnd::Shutdown,
                StreamEnd::SourceFailed if self.scope == RecoveryScope::Source => {
                    self.transition(SupervisorState::Recovering);
                    if self.wait_before_reconnect().await == WaitOutcome::Shutdown {
                        return CycleEnd::Shutdown;
                    }
                }
                StreamEnd::SourceFailed => return CycleEnd::SourceFailed,
                StreamEnd::PublishFailed => return CycleEnd::RemoteFailed,
            }
        }
    }

    async fn stream(
        &mut self,
        session: &R::Session,
        conn: &mut Connection,
        published: &mut bool,
    ) -> StreamEnd {
        loop {
            let data = match self.source.read(conn).await {
                Ok(data) => data,
                Err(SourceError::Cancelled) => return StreamEnd::Shutdown,
                Err(SourceError::Connection(e)) => {
                    self.stats.source_failures += 1;
                    warn!(error = %e, kind = e.kind(), "Producer connection lost");
                    return StreamEnd::SourceFailed;
                }
            };

            let reading = match self.parser.parse(data, Utc::now()) {
                Ok(reading) => reading,
                Err(e) => {
                    self.stats.parse_errors += 1;
                    warn!(
                        error = %e,
                        raw = %String::from_utf8_lossy(data).trim_end(),
                        "Dropping malformed message"
                    );
                    continue;
                }
            };
            self.stats.readings += 1;
            self.source_recovery.reset();

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                result = self.publisher.publish(session, &reading) => Some(result),
            };

            match result {
                None => return StreamEnd::Shutdown,
                Some(Ok(PublishOutcome::Sent)) => {
                    self.stats.published += 1;
                    if !*published {
                        *published = true;
                        self.remote_backoff.reset();
                    }
                }
                Some(Ok(PublishOutcome::Throttled)) => self.stats.throttled += 1,
                Some(Err(e)) => {
                    self.stats.publish_failures += 1;
                    warn!(
                        error = %e,
                        kind = e.kind(),
                        taken = reading.taken,
                        empty = reading.empty,
                        "Publish failed, reading dropped"
                    );
                    return StreamEnd::PublishFailed;
                }
            }
        }
    }

    async fn wait_before_reconnect(&mut self) -> WaitOutcome {
        let delay = self.source_recovery.next_delay();
        info!(
            attempt = self.source_recovery.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting producer, keeping platform session"
        );
        self.shutdown.wait_or(delay).await
    }

    async fn wait_before_reopen(&mut self) -> WaitOutcome {
        let delay = self.remote_backoff.next_delay();
        info!(
            attempt = self.remote_backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Waiting before reopening platform session"
        );
        self.shutdown.wait_or(delay).await
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Supervisor state change");
            self.state = next;
        }
    }
}

async fn startup_queries<S: RemoteSession>(
    session: &S,
) -> std::result::Result<(Vec<String>, Vec<Value>), RemoteError> {
    let devices = session.fetch_device_list().await?;
    let twins = session.fetch_twins().await?;
    Ok((devices, twins))
}
