//! Reading - one canonical sensor sample with an open metric map.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Column holding the sample instant.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Column holding the originating device id.
pub const SOURCE_COLUMN: &str = "source_id";

/// Metrics in the order they are laid out in a shard header. Metrics not
/// listed here follow in alphabetical order.
pub const KNOWN_METRICS: &[&str] = &[
    "temperature",
    "humidity",
    "pressure",
    "noise",
    "pm1",
    "pm2_5",
    "pm10",
    "voltage",
];

/// One sensor sample.
///
/// `timestamp` and `source_id` are always present. Every metric is optional:
/// a metric that was not recorded is absent from `fields`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub fields: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, source_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style metric setter.
    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

/// Parse an ISO-like timestamp into UTC.
///
/// Accepts RFC 3339 with any offset, and naive `YYYY-MM-DD[T ]HH:MM:SS[.f]`
/// with or without a trailing numeric offset. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    let naive = raw.trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(parsed.and_utc());
        }
    }

    None
}

/// Serialized form used inside shards.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
