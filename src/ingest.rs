//! IngestPipeline - turns inbound reading payloads into one store append.
//!
//! A batch is a single payload object or an array of them:
//!
//! ```json
//! {
//!   "nickname": "enviro-garden",
//!   "timestamp": "2023-01-08 17:32:33",
//!   "readings": { "temperature": 21.5, "humidity": "40.1", "voltage": null },
//!   "model": "urban",
//!   "uid": "e6614c311b6a"
//! }
//! ```
//!
//! The source id may be sent as `sourceId`, `source_id` or `nickname`. Payloads
//! from any other source are dropped without error. Malformed payloads are
//! rejected individually and reported with their batch index; the rest of the
//! batch is still stored. Accepted readings go to the store in one `append`.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::reading::{parse_timestamp, Reading};
use crate::remote::DocumentStore;
use crate::store::ReadingsStore;

const SOURCE_KEYS: &[&str] = &["sourceId", "source_id", "nickname"];

/// Ingest settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Only payloads from this source are stored.
    pub accepted_source: String,
    pub username: String,
    pub password: String,
    /// Metrics every payload must carry; a payload missing one is rejected.
    #[serde(default)]
    pub required_metrics: Vec<String>,
}

/// Error type for ingest operations.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Credentials missing or not matching the configured ones.
    AuthenticationFailed,
    /// The body is not a JSON object or array.
    MalformedBody(String),
    /// The store append failed; nothing from the batch was committed.
    Store(StoreError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::AuthenticationFailed => write!(f, "Authentication failed"),
            IngestError::MalformedBody(msg) => write!(f, "malformed body: {}", msg),
            IngestError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

impl IngestError {
    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::AuthenticationFailed => 401,
            IngestError::MalformedBody(_) => 400,
            IngestError::Store(_) => 500,
        }
    }
}

/// A payload that was not stored because it was malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Position in the batch.
    pub index: usize,
    pub reason: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IngestReport {
    /// Rows committed to the store.
    pub accepted: usize,
    /// Payloads dropped because their source did not match.
    pub filtered: usize,
    pub rejected: Vec<Rejection>,
}

impl IngestReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// HTTP Basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decode an `Authorization: Basic <base64(user:pass)>` header value.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self::new(username, password))
    }
}

/// Validates batches and appends them to a [`ReadingsStore`].
pub struct IngestPipeline<D> {
    store: ReadingsStore<D>,
    config: IngestConfig,
}

impl<D: DocumentStore> IngestPipeline<D> {
    pub fn new(store: ReadingsStore<D>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ReadingsStore<D> {
        &self.store
    }

    pub fn accepted_source(&self) -> &str {
        &self.config.accepted_source
    }

    /// Check credentials against the configured username and password.
    pub fn authenticate(&self, credentials: Option<&BasicCredentials>) -> Result<(), IngestError> {
        match credentials {
            Some(c)
                if constant_time_eq(&c.username, &self.config.username)
                    & constant_time_eq(&c.password, &self.config.password) =>
            {
                Ok(())
            }
            _ => Err(IngestError::AuthenticationFailed),
        }
    }

    /// Parse a raw JSON body and ingest it.
    pub fn ingest_json(&self, body: &[u8]) -> Result<IngestReport, IngestError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| IngestError::MalformedBody(e.to_string()))?;
        self.ingest(&value)
    }

    /// Ingest a batch: filter by source, convert, append once.
    pub fn ingest(&self, batch: &Value) -> Result<IngestReport, IngestError> {
        let payloads: Vec<&Value> = match batch {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![batch],
            other => {
                return Err(IngestError::MalformedBody(format!(
                    "expected an object or an array, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut report = IngestReport::default();
        let mut readings = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.into_iter().enumerate() {
            match self.convert(payload) {
                Ok(Some(reading)) => readings.push(reading),
                Ok(None) => report.filtered += 1,
                Err(reason) => report.rejected.push(Rejection { index, reason }),
            }
        }

        report.accepted = self.store.append(&readings)?;
        Ok(report)
    }

    /// `Ok(None)` when the payload belongs to another source.
    fn convert(&self, payload: &Value) -> Result<Option<Reading>, String> {
        let object = payload
            .as_object()
            .ok_or_else(|| format!("payload is {}, not an object", json_kind(payload)))?;

        let source = SOURCE_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .ok_or("missing source id")?
            .as_str()
            .ok_or("source id is not a string")?;
        if source != self.config.accepted_source {
            return Ok(None);
        }

        let raw_timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or("missing timestamp")?;
        let timestamp = parse_timestamp(raw_timestamp)
            .ok_or_else(|| format!("unparseable timestamp {:?}", raw_timestamp))?;

        let metrics = object
            .get("readings")
            .and_then(Value::as_object)
            .ok_or("missing readings object")?;

        let normalizer = self.store.normalizer();
        let mut fields = BTreeMap::new();
        for (raw, value) in metrics {
            let name = normalizer.metric_name(raw)?;
            if let Some(value) = metric_value(value).map_err(|e| format!("{}: {}", raw, e))? {
                if fields.insert(name.clone(), value).is_some() {
                    return Err(format!("metric {} given more than once", name));
                }
            }
        }

        if let Some(missing) = self
            .config
            .required_metrics
            .iter()
            .find(|metric| !fields.contains_key(*metric))
        {
            return Err(format!("missing required metric {}", missing));
        }

        Ok(Some(Reading {
            timestamp,
            source_id: source.to_string(),
            fields,
        }))
    }
}

/// Numbers and numeric strings are values; `null`, empty strings and NaN are
/// absent.
fn metric_value(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{} is out of range", n)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            s.parse::<f64>()
                .map(Some)
                .map_err(|_| format!("not a number {:?}", s))
        }
        other => Err(format!("expected a number, got {}", json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
