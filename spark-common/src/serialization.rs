//! Payload encoding for the Zenoh side.
//!
//! The platform consumes JSON. CBOR is available for constrained links;
//! receivers tell the two apart with [`Format::detect`].

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Payload encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Cbor,
}

impl Format {
    /// Guess the encoding of `data`.
    ///
    /// A JSON document starts with `{` or `[` after optional whitespace;
    /// anything else is treated as CBOR.
    pub fn detect(data: &[u8]) -> Self {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | Some(b'[') => Self::Json,
            _ => Self::Cbor,
        }
    }

    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::Cbor => {
                let mut buf = Vec::with_capacity(128);
                ciborium::into_writer(value, &mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            Self::Json => serde_json::from_slice(data).map_err(Error::from),
            Self::Cbor => Ok(ciborium::from_reader(data)?),
        }
    }
}

/// Encode `value` as `format`.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    format.encode(value)
}

/// Decode `data` as `format`.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    format.decode(data)
}

/// Shorthand for [`Format::detect`].
pub fn detect_format(data: &[u8]) -> Format {
    Format::detect(data)
}

/// Decode `data` in whichever encoding it appears to use.
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Format::detect(data).decode(data)
}
