//! Shard naming and the catalog of shards backing the dataset.
//!
//! # Layout
//!
//! ```text
//! readings.csv                      # base shard, created by the first append
//! readings_20230108T173233.csv      # rollover shard
//! readings_20230108T173233_001.csv  # rollover in the same second / clock skew
//! readings_20230108T173233_z1000.csv
//! notes.md                          # not a shard, ignored
//! ```
//!
//! Sequence suffixes are three digits wide. Wider ones carry one `z` per
//! extra digit so `_z1000` still sorts after `_999`.
//!
//! # Invariants
//!
//! - Shard names sort lexicographically in creation order.
//! - The greatest name is the only shard that receives appends.
//! - A rollover name always sorts after the shard it replaces as latest.

use chrono::{DateTime, Utc};

use crate::remote::Listing;

/// Length of the compact `YYYYMMDDTHHMMSS` token.
pub const TOKEN_LEN: usize = 15;

const TOKEN_FORMAT: &str = "%Y%m%dT%H%M%S";
const SEQUENCE_DIGITS: usize = 3;
const SEQUENCE_WIDENER: char = 'z';

/// Base and rollover shard names derived from one configured base file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardNaming {
    stem: String,
    /// Extension including the leading dot, or empty.
    extension: String,
}

impl ShardNaming {
    pub fn new(base_name: &str) -> Self {
        match base_name.rfind('.') {
            Some(pos) if pos > 0 => Self {
                stem: base_name[..pos].to_string(),
                extension: base_name[pos..].to_string(),
            },
            _ => Self {
                stem: base_name.to_string(),
                extension: String::new(),
            },
        }
    }

    pub fn base(&self) -> String {
        format!("{}{}", self.stem, self.extension)
    }

    /// `<stem>_<YYYYMMDDTHHMMSS><ext>` for the given instant.
    pub fn rollover(&self, at: DateTime<Utc>) -> String {
        self.with_token(&at.format(TOKEN_FORMAT).to_string(), None)
    }

    /// Name for a shard that must sort strictly after `latest`.
    ///
    /// Uses the clock token when that already sorts later; otherwise keeps
    /// `latest`'s token and bumps its sequence suffix.
    pub fn next_after(&self, latest: &str, at: DateTime<Utc>) -> String {
        let candidate = self.rollover(at);
        if candidate.as_str() > latest {
            return candidate;
        }

        let name = match self.parse_rollover(latest) {
            Some((token, sequence)) => self.with_token(token, Some(sequence + 1)),
            // latest is the base shard; any rollover name sorts after it
            None => candidate,
        };
        debug_assert!(self.is_shard(&name) && name.as_str() > latest);
        name
    }

    /// Whether `name` is the base shard or one of its rollovers.
    pub fn is_shard(&self, name: &str) -> bool {
        name == self.base() || self.parse_rollover(name).is_some()
    }

    fn with_token(&self, token: &str, sequence: Option<u64>) -> String {
        match sequence {
            Some(seq) => format!(
                "{}_{}_{}{}",
                self.stem,
                token,
                encode_sequence(seq),
                self.extension
            ),
            None => format!("{}_{}{}", self.stem, token, self.extension),
        }
    }

    /// Split a rollover name into its token and sequence (0 when absent).
    fn parse_rollover<'a>(&self, name: &'a str) -> Option<(&'a str, u64)> {
        let rest = name.strip_prefix(self.stem.as_str())?.strip_prefix('_')?;
        let rest = rest.strip_suffix(self.extension.as_str())?;

        let (token, sequence) = match rest.split_once('_') {
            Some((token, seq)) => (token, decode_sequence(seq)?),
            None => (rest, 0),
        };

        is_token(token).then_some((token, sequence))
    }
}

/// `7` -> `007`, `1000` -> `z1000`, `10000` -> `zz10000`.
fn encode_sequence(seq: u64) -> String {
    let digits = format!("{:0width$}", seq, width = SEQUENCE_DIGITS);
    let widener: String = std::iter::repeat(SEQUENCE_WIDENER)
        .take(digits.len() - SEQUENCE_DIGITS)
        .collect();
    format!("{}{}", widener, digits)
}

/// Only the canonical encoding is accepted, so every sequence has one name.
fn decode_sequence(text: &str) -> Option<u64> {
    let digits = text.trim_start_matches(SEQUENCE_WIDENER);
    let widened = text.len() - digits.len();
    if digits.len() != SEQUENCE_DIGITS + widened || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if widened > 0 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

fn is_token(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == TOKEN_LEN
        && bytes[8] == b'T'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..].iter().all(u8::is_ascii_digit)
}

/// Ordered shard names taken from one listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardCatalog {
    names: Vec<String>,
}

impl ShardCatalog {
    /// Keep only documents that are shards of `naming`, ascending by name.
    pub fn from_listing(listing: &Listing, naming: &ShardNaming) -> Self {
        Self::from_names(listing.names(), naming)
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>, naming: &ShardNaming) -> Self {
        let mut names: Vec<String> = names
            .into_iter()
            .filter(|name| naming.is_shard(name))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The shard eligible for appends.
    pub fn latest(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
