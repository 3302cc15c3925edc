use zenoh::Session;

use crate::config::{SslConfig, ZenohConfig};
use crate::error::{Error, Result};

/// Extra connection settings layered on top of [`ZenohConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions<'a> {
    /// Client certificate and CA for mutual TLS.
    pub ssl: Option<&'a SslConfig>,

    /// Additional endpoint to connect to (e.g. a discovery locator).
    pub extra_endpoint: Option<&'a str>,
}

/// Build a Zenoh configuration from the bridge settings.
pub fn build_zenoh_config(config: &ZenohConfig, options: &ConnectOptions<'_>) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    if !matches!(config.mode.as_str(), "client" | "peer" | "router") {
        return Err(Error::config(format!(
            "Invalid Zenoh mode '{}', expected client, peer or router",
            config.mode
        )));
    }
    insert(&mut zenoh_config, "mode", &to_json(&config.mode)?)?;

    let mut connect = config.connect.clone();
    if let Some(endpoint) = options.extra_endpoint {
        if !connect.iter().any(|e| e == endpoint) {
            connect.push(endpoint.to_string());
        }
    }

    if !connect.is_empty() {
        insert(&mut zenoh_config, "connect/endpoints", &to_json(&connect)?)?;
    }

    if !config.listen.is_empty() {
        insert(&mut zenoh_config, "listen/endpoints", &to_json(&config.listen)?)?;
    }

    if let Some(ssl) = options.ssl {
        insert(
            &mut zenoh_config,
            "transport/link/tls/root_ca_certificate",
            &to_json(&ssl.ca_path)?,
        )?;
        insert(
            &mut zenoh_config,
            "transport/link/tls/connect_private_key",
            &to_json(&ssl.key_path)?,
        )?;
        insert(
            &mut zenoh_config,
            "transport/link/tls/connect_certificate",
            &to_json(&ssl.cert_path)?,
        )?;
        insert(&mut zenoh_config, "transport/link/tls/enable_mtls", "true")?;
    }

    Ok(zenoh_config)
}

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig, options: &ConnectOptions<'_>) -> Result<Session> {
    let zenoh_config = build_zenoh_config(config, options)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        extra_endpoint = ?options.extra_endpoint,
        tls = options.ssl.is_some(),
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

fn insert(config: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    config
        .insert_json5(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key}: {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Error::from)
}
