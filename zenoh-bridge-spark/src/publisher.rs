//! Shapes readings into platform batches and rate-limits transmission.

use std::time::Duration;

use spark_common::{OccupancyRecord, TelemetryBatch};
use tokio::time::Instant;
use tracing::debug;

use crate::config::SparkBridgeConfig;
use crate::error::PublishError;
use crate::parser::Reading;
use crate::remote::RemoteSession;

/// What happened to a reading handed to [`TelemetryPublisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The batch was accepted by the session.
    Sent,
    /// A transmit happened within the interval; the reading was dropped.
    Throttled,
}

/// Minimum spacing between transmits.
///
/// Only successful transmits are recorded, so a failed send does not delay
/// the next attempt.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_transmit: Option<Instant>,
}

impl Throttle {
    /// A zero interval lets every reading through.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_transmit: None,
        }
    }

    /// Whether a transmit at `now` is allowed.
    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_transmit {
            None => true,
            Some(_) if self.interval.is_zero() => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record a successful transmit at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last_transmit = Some(now);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Builds occupancy batches and hands them to a [`RemoteSession`].
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    unique_id: String,
    location: [f64; 2],
    publish_timeout: Duration,
    throttle: Throttle,
}

impl TelemetryPublisher {
    pub fn new(
        unique_id: impl Into<String>,
        location: [f64; 2],
        transmit_interval: Duration,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            location,
            publish_timeout,
            throttle: Throttle::new(transmit_interval),
        }
    }

    pub fn from_config(config: &SparkBridgeConfig) -> Self {
        Self::new(
            config.ids.unique_id.clone(),
            config.telemetry.location,
            Duration::from_secs(config.telemetry.transmit_interval_secs),
            Duration::from_millis(config.telemetry.publish_timeout_ms),
        )
    }

    /// The single-record batch for `reading`.
    pub fn batch_for(&self, reading: &Reading) -> TelemetryBatch {
        vec![OccupancyRecord::new(
            self.unique_id.clone(),
            &reading.observed_at,
            reading.taken,
            reading.empty,
            self.location,
        )]
    }

    /// Send `reading` unless throttled.
    ///
    /// On error the reading is gone; callers must not retry it.
    pub async fn publish<S: RemoteSession>(
        &mut self,
        session: &S,
        reading: &Reading,
    ) -> Result<PublishOutcome, PublishError> {
        let now = Instant::now();
        if !self.throttle.is_open(now) {
            debug!(
                taken = reading.taken,
                empty = reading.empty,
                interval_secs = self.throttle.interval().as_secs(),
                "Reading throttled"
            );
            return Ok(PublishOutcome::Throttled);
        }

        let batch = self.batch_for(reading);

        match tokio::time::timeout(self.publish_timeout, session.send(&batch)).await {
            Ok(Ok(())) => {
                self.throttle.record(now);
                debug!(
                    taken = reading.taken,
                    empty = reading.empty,
                    time = %batch[0].time,
                    "Reading published"
                );
                Ok(PublishOutcome::Sent)
            }
            Ok(Err(e)) => Err(PublishError::Transport(e)),
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        }
    }
}
