use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout expected by the platform: whole seconds, literal `.000Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

/// A batch of occupancy records, sent as one message.
pub type TelemetryBatch = Vec<OccupancyRecord>;

/// A single occupancy record as delivered to the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    /// Device identifier registered on the platform.
    #[serde(rename = "uniqueId")]
    pub unique_id: String,

    /// UTC timestamp formatted with [`TIMESTAMP_FORMAT`].
    pub time: String,

    /// The measured values.
    pub data: OccupancyData,
}

/// Occupancy counters plus the static location of the lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyData {
    /// Number of taken parking spots.
    pub taken: u64,

    /// Number of empty parking spots.
    pub empty: u64,

    /// `[latitude, longitude]` of the monitored lot.
    pub location: [f64; 2],
}

impl OccupancyRecord {
    /// Create a record for a sample observed at `observed_at`.
    pub fn new(
        unique_id: impl Into<String>,
        observed_at: &DateTime<Utc>,
        taken: u64,
        empty: u64,
        location: [f64; 2],
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            time: format_timestamp(observed_at),
            data: OccupancyData {
                taken,
                empty,
                location,
            },
        }
    }
}

/// Format a timestamp the way the platform expects it.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}
