//! SPARK bridge configuration.
//!
//! The configuration is usually split across two files: one holding the
//! device identity and TLS material (`ids`, `ssl`) and one holding the
//! deployment settings. They are merged top-level-key-wise, last file wins.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spark_common::{KEY_PREFIX, LoggingConfig, SslConfig, ZenohConfig, serialization::Format};

use crate::backoff::BackoffConfig;
use crate::error::{BridgeError, Result};
use crate::parser::FieldOrder;

/// Complete SPARK bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkBridgeConfig {
    /// Device identity on the platform.
    pub ids: DeviceIdentity,

    /// TLS material for the platform connection.
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// Platform endpoints.
    #[serde(default)]
    pub networking: NetworkingConfig,

    /// IPv4 address of the producer socket.
    #[serde(default)]
    pub spark_socket_ipv4: Option<String>,

    /// IPv6 address of the producer socket.
    #[serde(default)]
    pub spark_socket_ipv6: Option<String>,

    /// Port of the producer socket.
    pub spark_socket_port: u16,

    /// Producer socket behaviour.
    pub source: SourceConfig,

    /// Payload shaping and throttling.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Session recovery policy.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this device on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Device unique id; also the `uniqueId` field of every record.
    pub unique_id: String,

    /// Platform solution/company id.
    #[serde(default)]
    pub sid: String,
}

/// Platform endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingConfig {
    /// Locator of the platform gateway, added to the Zenoh connect endpoints.
    #[serde(default)]
    pub discovery_url: Option<String>,
}

/// How the producer socket is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Connect a TCP stream to the producer.
    Stream,
    /// Bind a UDP socket and receive one datagram per sample.
    Datagram,
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Datagram => write!(f, "datagram"),
        }
    }
}

/// Producer socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stream (TCP) or datagram (UDP).
    pub mode: SourceMode,

    /// Order of the two counters on the wire. Required: producer builds differ.
    pub field_order: FieldOrder,

    /// Read buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Stream mode: connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle read timeout in milliseconds (0 = wait forever).
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Reconnect backoff for the producer socket.
    #[serde(default = "default_source_backoff")]
    pub backoff: BackoffConfig,
}

fn default_buffer_size() -> usize {
    1024
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_source_backoff() -> BackoffConfig {
    BackoffConfig::from_secs(1, 8)
}

/// Payload shaping and throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Key expression prefix for publishing.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Minimum seconds between transmits (0 = send every reading).
    #[serde(default)]
    pub transmit_interval_secs: u64,

    /// Static `[latitude, longitude]` of the lot.
    #[serde(default)]
    pub location: [f64; 2],

    /// Upper bound on a single publish, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Payload encoding.
    #[serde(default)]
    pub format: Format,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            transmit_interval_secs: 0,
            location: [0.0, 0.0],
            publish_timeout_ms: default_publish_timeout_ms(),
            format: Format::default(),
        }
    }
}

/// What gets torn down when the producer connection fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryScope {
    /// Close the remote session too and wait before reopening it.
    ///
    /// The wait is the minimum remote backoff delay: producer failures do
    /// not grow the platform backoff.
    #[default]
    Session,
    /// Keep the remote session; reconnect only the producer socket after a
    /// delay from the source backoff.
    Source,
}

/// Session recovery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Scope of teardown on producer connection failures.
    #[serde(default)]
    pub scope: RecoveryScope,

    /// Upper bound on opening the remote session, in milliseconds.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Backoff between remote session attempts.
    #[serde(default = "default_remote_backoff")]
    pub backoff: BackoffConfig,
}

fn default_open_timeout_ms() -> u64 {
    30_000
}

fn default_remote_backoff() -> BackoffConfig {
    BackoffConfig::from_secs(5, 300)
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scope: RecoveryScope::default(),
            open_timeout_ms: default_open_timeout_ms(),
            backoff: default_remote_backoff(),
        }
    }
}

impl SparkBridgeConfig {
    /// Load and merge the given files, then validate the result.
    pub fn load_from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let config: Self = spark_common::load_merged_config(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single JSON5 document and validate it.
    pub fn from_json5(content: &str) -> Result<Self> {
        let config: Self = spark_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.ids.unique_id.trim().is_empty() {
            return Err(BridgeError::validation("ids.uniqueId must not be empty"));
        }

        if self.source_host().is_none() {
            return Err(BridgeError::validation(
                "spark_socket_ipv4 or spark_socket_ipv6 must be set",
            ));
        }

        if self.spark_socket_port == 0 {
            return Err(BridgeError::validation("spark_socket_port must not be 0"));
        }

        if self.source.buffer_size == 0 {
            return Err(BridgeError::validation(
                "source.buffer_size must be greater than 0",
            ));
        }

        if self.telemetry.key_prefix.is_empty() {
            return Err(BridgeError::validation(
                "telemetry.key_prefix must not be empty",
            ));
        }

        self.source
            .backoff
            .validate("source.backoff")
            .map_err(BridgeError::validation)?;
        self.recovery
            .backoff
            .validate("recovery.backoff")
            .map_err(BridgeError::validation)?;

        Ok(())
    }

    /// Host of the producer socket.
    ///
    /// Datagram deployments bind the IPv6 address, stream deployments connect
    /// to the IPv4 one; either falls back to the other family if unset.
    pub fn source_host(&self) -> Option<&str> {
        let v4 = non_empty(&self.spark_socket_ipv4);
        let v6 = non_empty(&self.spark_socket_ipv6);
        match self.source.mode {
            SourceMode::Datagram => v6.or(v4),
            SourceMode::Stream => v4.or(v6),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
    {
        ids: { uniqueId: "lot-01", sid: "abc" },
        spark_socket_ipv6: "::1",
        spark_socket_port: 50000,
        source: { mode: "datagram", field_order: "taken_empty" },
    }
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = SparkBridgeConfig::from_json5(MINIMAL).unwrap();

        assert_eq!(config.ids.unique_id, "lot-01");
        assert_eq!(config.source.mode, SourceMode::Datagram);
        assert_eq!(config.source.buffer_size, 1024);
        assert_eq!(config.source.backoff, BackoffConfig::from_secs(1, 8));
        assert_eq!(config.recovery.backoff, BackoffConfig::from_secs(5, 300));
        assert_eq!(config.recovery.scope, RecoveryScope::Session);
        assert_eq!(config.telemetry.transmit_interval_secs, 0);
        assert_eq!(config.telemetry.key_prefix, "spark");
        assert_eq!(config.telemetry.format, Format::Json);
        assert!(config.ssl.is_none());
        assert_eq!(config.source_host(), Some("::1"));
    }

    #[test]
    fn test_full_config() {
        let json5 = r#"
        {
            ssl: { keyPath: "/k", certPath: "/c", caPath: "/ca" },
            networking: { discoveryUrl: "tls/gateway.example.com:7447" },
            ids: { uniqueId: "lot-02", sid: "xyz" },
            spark_socket_ipv4: "127.0.0.1",
            spark_socket_ipv6: "::1",
            spark_socket_port: 50001,
            source: {
                mode: "stream",
                field_order: "empty_taken",
                buffer_size: 512,
                read_timeout_ms: 60000,
                backoff: { min_delay_ms: 500, max_delay_ms: 4000 },
            },
            telemetry: {
                key_prefix: "plant/spark",
                transmit_interval_secs: 15,
                location: [49.0, 11.0],
                format: "cbor",
            },
            recovery: { scope: "source", open_timeout_ms: 1000 },
            logging: { level: "debug", format: "json" },
        }
        "#;

        let config = SparkBridgeConfig::from_json5(json5).unwrap();

        assert_eq!(config.source.field_order, FieldOrder::EmptyTaken);
        assert_eq!(config.source_host(), Some("127.0.0.1"));
        assert_eq!(config.telemetry.location, [49.0, 11.0]);
        assert_eq!(config.telemetry.format, Format::Cbor);
        assert_eq!(config.recovery.scope, RecoveryScope::Source);
        assert_eq!(
            config.networking.discovery_url.as_deref(),
            Some("tls/gateway.example.com:7447")
        );
        assert_eq!(config.ssl.unwrap().cert_path, "/c");
    }

    #[test]
    fn test_field_order_is_required() {
        let json5 = r#"
        {
            ids: { uniqueId: "lot-01" },
            spark_socket_ipv4: "127.0.0.1",
            spark_socket_port: 50000,
            source: { mode: "stream" },
        }
        "#;
        assert!(matches!(
            SparkBridgeConfig::from_json5(json5),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_missing_host_rejected() {
        let json5 = r#"
        {
            ids: { uniqueId: "lot-01" },
            spark_socket_ipv4: "  ",
            spark_socket_port: 50000,
            source: { mode: "stream", field_order: "taken_empty" },
        }
        "#;
        assert!(matches!(
            SparkBridgeConfig::from_json5(json5),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_empty_unique_id_rejected() {
        let json5 = MINIMAL.replace("lot-01", "");
        assert!(matches!(
            SparkBridgeConfig::from_json5(&json5),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let json5 = MINIMAL.replace(
            r#"field_order: "taken_empty""#,
            r#"field_order: "taken_empty", backoff: { min_delay_ms: 9000, max_delay_ms: 8000 }"#,
        );
        assert!(matches!(
            SparkBridgeConfig::from_json5(&json5),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_datagram_falls_back_to_ipv4() {
        let json5 = MINIMAL.replace(r#"spark_socket_ipv6: "::1""#, r#"spark_socket_ipv4: "0.0.0.0""#);
        let config = SparkBridgeConfig::from_json5(&json5).unwrap();
        assert_eq!(config.source_host(), Some("0.0.0.0"));
    }

    #[test]
    fn test_load_from_split_files() {
        use std::io::Write;

        let mut secrets = tempfile::NamedTempFile::new().unwrap();
        secrets
            .write_all(br#"{ ids: { uniqueId: "lot-09", sid: "s" }, ssl: { keyPath: "/k", certPath: "/c", caPath: "/ca" } }"#)
            .unwrap();
        let mut deployment = tempfile::NamedTempFile::new().unwrap();
        deployment
            .write_all(
                br#"{ spark_socket_ipv6: "::1", spark_socket_port: 50000,
                      source: { mode: "datagram", field_order: "taken_empty" } }"#,
            )
            .unwrap();

        let config =
            SparkBridgeConfig::load_from_files(&[secrets.path(), deployment.path()]).unwrap();

        assert_eq!(config.ids.unique_id, "lot-09");
        assert!(config.ssl.is_some());
        assert_eq!(config.spark_socket_port, 50000);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = SparkBridgeConfig::load_from_files(&["/nonexistent/spark/config.json"]);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
