//! enviro-server - receives sensor readings over HTTP and stores them in a gist.
//!
//! Usage: `enviro-server [path/to/enviro.toml]` (defaults to `enviro.toml`,
//! falling back to `config/enviro.toml`).

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use enviro_readings::remote::GistDocumentStore;
use enviro_readings::{http, AppConfig, IngestPipeline, ReadingsStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    if let Some(arg) = std::env::args_os().nth(1) {
        return PathBuf::from(arg);
    }
    let local = PathBuf::from("enviro.toml");
    if local.exists() {
        local
    } else {
        PathBuf::from("config").join("enviro.toml")
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let path = config_path();
    let config = AppConfig::load(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(config = %path.display(), "loaded configuration");

    // The blocking gist client must be built outside the async runtime.
    let remote = GistDocumentStore::new(config.gist()?)?;
    let store = ReadingsStore::new(remote, &config.store, config.normalizer());
    let pipeline = Arc::new(IngestPipeline::new(store, config.ingest.clone()));

    info!(
        base_shard = %config.store.base_shard_name,
        max_rows_per_shard = config.store.max_rows_per_shard,
        accepted_source = %config.ingest.accepted_source,
        "starting enviro-server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    // Keep one handle outside the runtime so the blocking client is dropped there.
    let served = runtime.block_on(http::serve(Arc::clone(&pipeline), &config.server.bind));
    drop(runtime);
    drop(pipeline);
    served?;
    Ok(())
}
