//! Configuration pieces shared by every SPARK process.
//!
//! Files are JSON5. Each binary defines its own top-level struct and
//! embeds the sections below.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// How to reach the Zenoh network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZenohConfig {
    /// "client", "peer" or "router".
    pub mode: String,

    /// Routers or peers to dial.
    pub connect: Vec<String>,

    /// Local endpoints to accept sessions on.
    pub listen: Vec<String>,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: "client".into(),
            connect: vec![],
            listen: vec![],
        }
    }
}

/// TLS material used to authenticate against the platform.
///
/// Key names follow the platform's own configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfig {
    /// Private key of the device certificate (PEM).
    pub key_path: String,

    /// Device certificate (PEM).
    pub cert_path: String,

    /// Root CA used to verify the platform (PEM).
    pub ca_path: String,
}

/// Shape of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `logging` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    parse_file(path, &read_config_file(path)?)
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
}

/// Load several configuration files and merge them into one value.
///
/// Files are applied in order. Top-level keys of a later file replace the
/// same keys of an earlier one wholesale; nested objects are not merged.
/// This lets secrets (`ids`, `ssl`) live in a separate file from the
/// deployment settings.
pub fn load_merged_config<T, P>(paths: &[P]) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    if paths.is_empty() {
        return Err(Error::config("No configuration file given"));
    }

    let merged = paths.iter().try_fold(Map::new(), |mut merged, path| {
        let path = path.as_ref();
        match parse_file(path, &read_config_file(path)?)? {
            Value::Object(map) => {
                merged.extend(map);
                Ok(merged)
            }
            _ => Err(Error::config(format!(
                "Config file '{}' must contain an object at the top level",
                path.display()
            ))),
        }
    })?;

    serde_json::from_value(Value::Object(merged))
        .map_err(|e| Error::config(format!("Invalid configuration: {e}")))
}

fn parse_file<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    json5::from_str(content)
        .map_err(|e| Error::config(format!("Failed to parse '{}': {e}", path.display())))
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct SampleConfig {
        #[serde(default)]
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        ssl: Option<SslConfig>,
        #[serde(default)]
        port: u16,
    }

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_config_sections() {
        let json5 = r#"
        {
            zenoh: {
                mode: "client",
                connect: ["tcp/localhost:7447"],
            },
            logging: {
                level: "debug",
                format: "json",
            },
            ssl: {
                keyPath: "/etc/spark/device.key",
                certPath: "/etc/spark/device.pem",
                caPath: "/etc/spark/root.pem",
            },
        }
        "#;

        let config: SampleConfig = parse_config(json5).unwrap();

        assert_eq!(config.zenoh.mode, "client");
        assert_eq!(config.zenoh.connect, vec!["tcp/localhost:7447"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.ssl.unwrap().ca_path, "/etc/spark/root.pem");
    }

    #[test]
    fn test_default_config() {
        let config: SampleConfig = parse_config("{}").unwrap();

        assert_eq!(config.zenoh.mode, "client");
        assert!(config.zenoh.connect.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.ssl.is_none());
    }

    #[test]
    fn test_merged_config_last_wins() {
        let secrets = write_file(r#"{ port: 1000, logging: { level: "trace" } }"#);
        let deployment = write_file(r#"{ port: 50000 }"#);

        let config: SampleConfig =
            load_merged_config(&[secrets.path(), deployment.path()]).unwrap();

        assert_eq!(config.port, 50000);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_merged_config_replaces_nested_objects() {
        let first = write_file(r#"{ logging: { level: "debug", format: "json" } }"#);
        let second = write_file(r#"{ logging: { level: "warn" } }"#);

        let config: SampleConfig = load_merged_config(&[first.path(), second.path()]).unwrap();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_merged_config_missing_file() {
        let result: Result<SampleConfig> = load_merged_config(&["/nonexistent/spark.json"]);
        assert!(matches!(result, Err(Error::ConfigFile { .. })));
    }

    #[test]
    fn test_merged_config_rejects_malformed_json() {
        let broken = write_file("{ port: ");
        let result: Result<SampleConfig> = load_merged_config(&[broken.path()]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_merged_config_rejects_non_object() {
        let list = write_file("[1, 2, 3]");
        let result: Result<SampleConfig> = load_merged_config(&[list.path()]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_single_config() {
        let file = write_file(r#"{ port: 7 }"#);
        let config: SampleConfig = load_config(file.path()).unwrap();
        assert_eq!(config.port, 7);
    }
}
