//! Schema normalisation between shard bodies and canonical [`Reading`]s.
//!
//! Shards written by different deployments carry different column sets. Every
//! shard is read through its own header: metric columns it has become entries
//! in `fields`, metric columns it lacks are simply absent. Renamed columns are
//! mapped back onto their canonical name through an alias table, the same way
//! an upcaster lifts an old payload to the current shape.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{self, Table};
use crate::error::StoreError;
use crate::reading::{
    format_timestamp, parse_timestamp, Reading, KNOWN_METRICS, SOURCE_COLUMN, TIMESTAMP_COLUMN,
};

/// Aliases every normalizer knows about, applied before configured ones.
const BUILTIN_ALIASES: &[(&str, &str)] = &[("nickname", SOURCE_COLUMN), ("sourceId", SOURCE_COLUMN)];

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Timestamp,
    Source,
    Metric(String),
    Skip,
}

/// Converts between shard text and canonical readings.
#[derive(Debug, Clone)]
pub struct SchemaNormalizer {
    fallback_source: String,
    aliases: BTreeMap<String, String>,
}

impl SchemaNormalizer {
    /// `fallback_source` fills `source_id` for shards written before the
    /// source column existed.
    pub fn new(fallback_source: impl Into<String>) -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            fallback_source: fallback_source.into(),
            aliases,
        }
    }

    /// Map a legacy column name onto its canonical name.
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    pub fn with_aliases(self, aliases: &BTreeMap<String, String>) -> Self {
        aliases
            .iter()
            .fold(self, |normalizer, (from, to)| normalizer.with_alias(from, to))
    }

    /// Parse one shard body into readings, in stored order.
    pub fn parse_shard(&self, shard: &str, body: &str) -> Result<Vec<Reading>, StoreError> {
        let table = codec::parse_table(body).map_err(|e| StoreError::MalformedShard {
            shard: shard.to_string(),
            line: e.line,
            reason: e.reason,
        })?;
        self.normalize(shard, &table)
    }

    /// Turn a parsed table into readings.
    pub fn normalize(&self, shard: &str, table: &Table) -> Result<Vec<Reading>, StoreError> {
        let malformed = |line: usize, reason: String| StoreError::MalformedShard {
            shard: shard.to_string(),
            line,
            reason,
        };

        if table.rows.is_empty() {
            return Ok(Vec::new());
        }

        let columns: Vec<Column> = table.header.iter().map(|name| self.classify(name)).collect();
        if !columns.contains(&Column::Timestamp) {
            return Err(malformed(1, "missing timestamp column".into()));
        }

        let mut readings = Vec::with_capacity(table.rows.len());
        for (line, cells) in &table.rows {
            let mut timestamp = None;
            let mut source = None;
            let mut fields = BTreeMap::new();

            for (column, cell) in columns.iter().zip(cells) {
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                match column {
                    Column::Timestamp if timestamp.is_none() => {
                        let parsed = parse_timestamp(cell)
                            .ok_or_else(|| malformed(*line, format!("bad timestamp {:?}", cell)))?;
                        timestamp = Some(parsed);
                    }
                    Column::Source if source.is_none() => source = Some(cell.to_string()),
                    Column::Metric(name) if !fields.contains_key(name) => {
                        if let Some(value) = parse_metric(cell)
                            .map_err(|reason| malformed(*line, format!("{}: {}", name, reason)))?
                        {
                            fields.insert(name.clone(), value);
                        }
                    }
                    _ => {}
                }
            }

            let timestamp = timestamp.ok_or_else(|| malformed(*line, "empty timestamp".into()))?;
            readings.push(Reading {
                timestamp,
                source_id: source.unwrap_or_else(|| self.fallback_source.clone()),
                fields,
            });
        }

        Ok(readings)
    }

    /// Serialize readings with the canonical header.
    ///
    /// Column order is `timestamp`, `source_id`, the known metrics in display
    /// order, then any other metric alphabetically. Absent values are empty.
    pub fn serialize(&self, readings: &[Reading]) -> String {
        let present: BTreeSet<&str> = readings
            .iter()
            .flat_map(|reading| reading.fields.keys().map(String::as_str))
            .collect();

        let mut metrics: Vec<&str> = KNOWN_METRICS
            .iter()
            .copied()
            .filter(|metric| present.contains(metric))
            .collect();
        metrics.extend(present.iter().copied().filter(|m| !KNOWN_METRICS.contains(m)));

        let header: Vec<String> = [TIMESTAMP_COLUMN, SOURCE_COLUMN]
            .into_iter()
            .chain(metrics.iter().copied())
            .map(str::to_string)
            .collect();

        let rows: Vec<Vec<String>> = readings
            .iter()
            .map(|reading| {
                let mut row = Vec::with_capacity(header.len());
                row.push(format_timestamp(&reading.timestamp));
                row.push(reading.source_id.clone());
                row.extend(
                    metrics
                        .iter()
                        .map(|m| reading.field(m).map(|v| v.to_string()).unwrap_or_default()),
                );
                row
            })
            .collect();

        codec::write_table(&header, &rows)
    }

    /// Canonical column name a metric called `raw` is stored and read back
    /// under. Names that land on the timestamp or source column, or on a
    /// column the reader skips, cannot hold a metric.
    pub fn metric_name(&self, raw: &str) -> Result<String, String> {
        match self.classify(raw) {
            Column::Metric(name) => Ok(name),
            Column::Timestamp | Column::Source => {
                Err(format!("metric {:?} collides with a reserved column", raw))
            }
            Column::Skip => Err(format!("metric name {:?} is not storable", raw)),
        }
    }

    fn classify(&self, raw: &str) -> Column {
        let name = raw.trim().trim_start_matches('\u{feff}');
        if name.is_empty() || name.starts_with("Unnamed:") {
            return Column::Skip;
        }
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        match canonical {
            TIMESTAMP_COLUMN => Column::Timestamp,
            SOURCE_COLUMN => Column::Source,
            metric => Column::Metric(metric.to_string()),
        }
    }
}

/// `Ok(None)` for NaN literals, which mean "no value".
fn parse_metric(cell: &str) -> Result<Option<f64>, String> {
    if cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("not a number {:?}", cell))
}
