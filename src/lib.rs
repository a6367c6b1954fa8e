//! Append-only environmental readings stored as sharded delimited-text
//! documents in a size-capped remote document collection.
//!
//! ```ignore
//! use enviro_readings::{ReadingsStore, SchemaNormalizer, StoreConfig};
//! use enviro_readings::remote::InMemoryDocumentStore;
//!
//! let store = ReadingsStore::new(
//!     InMemoryDocumentStore::new(),
//!     &StoreConfig::default(),
//!     SchemaNormalizer::new("enviro-garden"),
//! );
//! store.append(&readings)?;
//! let all = store.load_all()?;
//! ```

mod catalog;
mod codec;
mod config;
mod error;
#[cfg(feature = "http")]
pub mod http;
mod ingest;
mod reading;
pub mod remote;
mod schema;
mod store;

pub use catalog::{ShardCatalog, ShardNaming, TOKEN_LEN};
pub use codec::{parse_table, write_table, CodecError, Table};
pub use config::{AppConfig, ConfigError, LoggingConfig, RemoteConfig, SchemaConfig, ServerConfig};
pub use error::{RemoteError, StoreError};
pub use ingest::{
    BasicCredentials, IngestConfig, IngestError, IngestPipeline, IngestReport, Rejection,
};
pub use reading::{
    format_timestamp, parse_timestamp, Reading, KNOWN_METRICS, SOURCE_COLUMN, TIMESTAMP_COLUMN,
};
pub use schema::SchemaNormalizer;
pub use store::{
    LatestShard, ReadingsStore, ShardSummary, StoreConfig, DEFAULT_BASE_SHARD_NAME,
    DEFAULT_MAX_CONFLICT_RETRIES, DEFAULT_MAX_ROWS_PER_SHARD,
};
