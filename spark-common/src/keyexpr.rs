//! Key expressions used by the bridge on the Zenoh side.
//!
//! All keys are scoped by a prefix and the device `uniqueId`:
//!
//! ```text
//! <prefix>/<uniqueId>/telemetry              occupancy batches
//! <prefix>/<uniqueId>/@/alive                liveliness token
//! <prefix>/<uniqueId>/@/status               running/offline status
//! <prefix>/<uniqueId>/@/twin                 twin snapshot (queryable)
//! <prefix>/<uniqueId>/@/commands/<kind>      inbound commands
//! ```

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "spark";

/// Kind of inbound command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandChannel {
    /// Generic device command.
    Device,
    /// Twin (desired property) change.
    Twin,
    /// Firmware / OTA command.
    Firmware,
}

impl CommandChannel {
    /// All channels a device subscribes to.
    pub const ALL: [CommandChannel; 3] = [Self::Device, Self::Twin, Self::Firmware];

    /// Get the path segment for this channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Twin => "twin",
            Self::Firmware => "firmware",
        }
    }
}

/// Builder for the keys of one device.
#[derive(Debug, Clone)]
pub struct DeviceKeys {
    prefix: String,
    device: String,
}

impl DeviceKeys {
    /// Create the key set for `device` under `prefix`.
    pub fn new(prefix: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            device: device.into(),
        }
    }

    /// Key for occupancy batches.
    ///
    /// # Example
    /// ```
    /// use spark_common::keyexpr::DeviceKeys;
    ///
    /// let keys = DeviceKeys::new("spark", "lot-01");
    /// assert_eq!(keys.telemetry(), "spark/lot-01/telemetry");
    /// ```
    pub fn telemetry(&self) -> String {
        format!("{}/{}/telemetry", self.prefix, self.device)
    }

    /// Key of the device liveliness token.
    pub fn alive(&self) -> String {
        format!("{}/{}/@/alive", self.prefix, self.device)
    }

    /// Key for status messages.
    pub fn status(&self) -> String {
        format!("{}/{}/@/status", self.prefix, self.device)
    }

    /// Key of the twin snapshot queryable.
    pub fn twin(&self) -> String {
        format!("{}/{}/@/twin", self.prefix, self.device)
    }

    /// Key of an inbound command channel.
    pub fn command(&self, channel: CommandChannel) -> String {
        format!(
            "{}/{}/@/commands/{}",
            self.prefix,
            self.device,
            channel.as_str()
        )
    }
}

/// Wildcard matching the liveliness tokens of every device under `prefix`.
pub fn all_devices_alive_wildcard(prefix: &str) -> String {
    format!("{}/*/@/alive", prefix)
}

/// Extract the device id from a liveliness key (`<prefix>/<device>/@/alive`).
pub fn device_from_alive_key(key: &str) -> Option<&str> {
    let rest = key.strip_suffix("/@/alive")?;
    let (_, device) = rest.rsplit_once('/')?;
    if device.is_empty() { None } else { Some(device) }
}
