//! ReadingsStore - append-only readings dataset sharded across remote documents.
//!
//! Appends go to the lexicographically greatest shard until it would exceed
//! `max_rows_per_shard`; the batch then opens a new rollover shard and the old
//! one is never written again. Reads list the collection afresh, fetch every
//! shard and concatenate them in name order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ShardCatalog, ShardNaming};
use crate::error::{RemoteError, StoreError};
use crate::reading::Reading;
use crate::remote::{DocumentStore, Listing};
use crate::schema::SchemaNormalizer;

/// Row threshold that keeps a serialized shard under the gist API's one
/// megabyte inline limit with room for wide rows.
pub const DEFAULT_MAX_ROWS_PER_SHARD: usize = 1500;

pub const DEFAULT_BASE_SHARD_NAME: &str = "readings.csv";

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the first shard; rollover names are derived from it.
    pub base_shard_name: String,
    pub max_rows_per_shard: usize,
    /// How many times `append` re-derives its write after a revision conflict.
    pub max_conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_shard_name: DEFAULT_BASE_SHARD_NAME.to_string(),
            max_rows_per_shard: DEFAULT_MAX_ROWS_PER_SHARD,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// Contents of the shard currently eligible for appends.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestShard {
    pub name: String,
    pub rows: Vec<Reading>,
    /// Collection revision seen by the listing this shard was read from.
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardSummary {
    pub name: String,
    pub row_count: usize,
}

/// The readings dataset.
pub struct ReadingsStore<D> {
    remote: D,
    naming: ShardNaming,
    normalizer: SchemaNormalizer,
    max_rows_per_shard: usize,
    max_conflict_retries: u32,
    clock: fn() -> DateTime<Utc>,
}

impl<D: DocumentStore> ReadingsStore<D> {
    pub fn new(remote: D, config: &StoreConfig, normalizer: SchemaNormalizer) -> Self {
        Self {
            remote,
            naming: ShardNaming::new(&config.base_shard_name),
            normalizer,
            max_rows_per_shard: config.max_rows_per_shard,
            max_conflict_retries: config.max_conflict_retries,
            clock: Utc::now,
        }
    }

    /// Replace the time source used for rollover names.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn remote(&self) -> &D {
        &self.remote
    }

    pub fn naming(&self) -> &ShardNaming {
        &self.naming
    }

    pub fn normalizer(&self) -> &SchemaNormalizer {
        &self.normalizer
    }

    /// Fresh catalog of the shards backing the dataset.
    pub fn catalog(&self) -> Result<ShardCatalog, StoreError> {
        let listing = self.remote.list()?;
        Ok(ShardCatalog::from_listing(&listing, &self.naming))
    }

    /// Every reading, in shard-name order then stored order.
    ///
    /// Either every shard is merged or the call fails.
    pub fn load_all(&self) -> Result<Vec<Reading>, StoreError> {
        let listing = self.remote.list()?;
        let catalog = ShardCatalog::from_listing(&listing, &self.naming);

        let mut readings = Vec::new();
        for name in catalog.names() {
            readings.extend(self.read_shard(&listing, name)?);
        }
        debug!(
            shards = catalog.len(),
            rows = readings.len(),
            "loaded all shards"
        );
        Ok(readings)
    }

    /// Only the shard eligible for appends.
    pub fn load_latest_shard_only(&self) -> Result<LatestShard, StoreError> {
        let listing = self.remote.list()?;
        self.latest_from(&listing)?.ok_or(StoreError::EmptyCatalog)
    }

    /// Row counts per shard, ascending by name.
    pub fn shard_summaries(&self) -> Result<Vec<ShardSummary>, StoreError> {
        let listing = self.remote.list()?;
        let catalog = ShardCatalog::from_listing(&listing, &self.naming);
        let mut summaries = Vec::with_capacity(catalog.len());
        for name in catalog.names() {
            summaries.push(ShardSummary {
                name: name.clone(),
                row_count: self.read_shard(&listing, name)?.len(),
            });
        }
        Ok(summaries)
    }

    /// Append `rows` as one write, rolling over to a new shard when the latest
    /// one would exceed the row threshold. Returns the number of rows
    /// committed; on error nothing was committed.
    ///
    /// The write is conditional on the listing's revision. On a conflict the
    /// rollover decision is re-derived from a fresh listing, up to
    /// `max_conflict_retries` times.
    pub fn append(&self, rows: &[Reading]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut attempt = 0;
        loop {
            let listing = self.remote.list()?;
            let (target, content) = self.plan_append(&listing, rows)?;
            let body = self.normalizer.serialize(&content);

            match self
                .remote
                .replace(&target, &body, listing.revision.as_deref())
            {
                Ok(_) => {
                    debug!(shard = %target, rows = rows.len(), total = content.len(), "appended rows");
                    return Ok(rows.len());
                }
                Err(RemoteError::Conflict { expected, actual })
                    if attempt < self.max_conflict_retries =>
                {
                    attempt += 1;
                    debug!(%expected, %actual, attempt, "revision conflict, re-deriving append");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Pick the target shard and its full new content.
    fn plan_append(
        &self,
        listing: &Listing,
        rows: &[Reading],
    ) -> Result<(String, Vec<Reading>), StoreError> {
        let latest = match self.latest_from(listing)? {
            Some(latest) => latest,
            None => return Ok((self.naming.base(), rows.to_vec())),
        };

        if latest.rows.len() + rows.len() > self.max_rows_per_shard {
            let name = self.naming.next_after(&latest.name, (self.clock)());
            debug!(
                from = %latest.name,
                to = %name,
                existing = latest.rows.len(),
                incoming = rows.len(),
                "rolling over to new shard"
            );
            return Ok((name, rows.to_vec()));
        }

        let mut content = latest.rows;
        content.extend_from_slice(rows);
        Ok((latest.name, content))
    }

    fn latest_from(&self, listing: &Listing) -> Result<Option<LatestShard>, StoreError> {
        let catalog = ShardCatalog::from_listing(listing, &self.naming);
        let name = match catalog.latest() {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };
        let rows = self.read_shard(listing, &name)?;
        Ok(Some(LatestShard {
            name,
            rows,
            revision: listing.revision.clone(),
        }))
    }

    fn read_shard(&self, listing: &Listing, name: &str) -> Result<Vec<Reading>, StoreError> {
        match listing.content(name) {
            Some(body) => self.normalizer.parse_shard(name, body),
            None => {
                let body = self.remote.fetch(name)?;
                self.normalizer.parse_shard(name, &body)
            }
        }
    }
}
