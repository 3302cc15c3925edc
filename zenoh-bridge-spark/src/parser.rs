//! Parser for the SPARK producer wire format.
//!
//! The producer writes one line per sample:
//!
//! ```text
//! <int>,<int>\n
//! ```
//!
//! Which of the two integers is the taken count depends on the producer
//! build, so the order is configured explicitly with [`FieldOrder`].
//! Only the text before the first newline is decoded; anything after it
//! belongs to the next message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Order of the two counters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    /// `taken,empty`
    TakenEmpty,
    /// `empty,taken`
    EmptyTaken,
}

impl std::fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakenEmpty => write!(f, "taken,empty"),
            Self::EmptyTaken => write!(f, "empty,taken"),
        }
    }
}

/// One occupancy sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Number of taken spots.
    pub taken: u64,
    /// Number of empty spots.
    pub empty: u64,
    /// When the sample was received.
    pub observed_at: DateTime<Utc>,
}

/// Stateless decoder for producer messages.
#[derive(Debug, Clone, Copy)]
pub struct ReadingParser {
    order: FieldOrder,
}

impl ReadingParser {
    pub fn new(order: FieldOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> FieldOrder {
        self.order
    }

    /// Decode the first line of `data`, stamping it with `observed_at`.
    pub fn parse(&self, data: &[u8], observed_at: DateTime<Utc>) -> Result<Reading, ParseError> {
        let line = match data.iter().position(|b| *b == b'\n') {
            Some(end) => &data[..end],
            None => data,
        };

        let text = std::str::from_utf8(line).map_err(|e| ParseError::BadEncoding(e.to_string()))?;
        let text = text.trim();

        if text.is_empty() {
            return Err(ParseError::BadFormat("empty message".to_string()));
        }

        let fields: Vec<&str> = text.split(',').collect();
        let [first, second] = fields.as_slice() else {
            return Err(ParseError::BadFormat(format!(
                "expected 2 fields, got {} in {:?}",
                fields.len(),
                text
            )));
        };

        let first = parse_count(first)?;
        let second = parse_count(second)?;

        let (taken, empty) = match self.order {
            FieldOrder::TakenEmpty => (first, second),
            FieldOrder::EmptyTaken => (second, first),
        };

        Ok(Reading {
            taken,
            empty,
            observed_at,
        })
    }
}

fn parse_count(field: &str) -> Result<u64, ParseError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(ParseError::BadFormat("empty field".to_string()));
    }
    field
        .parse::<u64>()
        .map_err(|e| ParseError::BadFormat(format!("invalid count {:?}: {}", field, e)))
}
