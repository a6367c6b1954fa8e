//! InMemoryDocumentStore - a document collection held in process memory.
//!
//! Backs the test suites. Outages and per-document size caps can be simulated.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::RemoteError;

use super::{DocumentStore, Listing};

#[derive(Default)]
struct Collection {
    documents: BTreeMap<String, String>,
    revision: u64,
}

/// In-memory document collection backed by `Arc<RwLock<BTreeMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage). Every
/// successful replace bumps the collection revision, and conditional replaces
/// are checked under the write lock, so it behaves like a backend with real
/// compare-and-swap. Availability can be switched off to simulate outages.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    collection: Arc<RwLock<Collection>>,
    available: Arc<AtomicBool>,
    replaces: Arc<AtomicUsize>,
    max_document_bytes: Option<usize>,
    deferred_bodies: bool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collection: Arc::new(RwLock::new(Collection::default())),
            available: Arc::new(AtomicBool::new(true)),
            replaces: Arc::new(AtomicUsize::new(0)),
            max_document_bytes: None,
            deferred_bodies: false,
        }
    }

    /// Reject replaces whose content exceeds `bytes`, like a capped remote.
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = Some(bytes);
        self
    }

    /// Leave bodies out of listings so readers must `fetch` them.
    pub fn with_deferred_bodies(mut self) -> Self {
        self.deferred_bodies = true;
        self
    }

    /// Toggle simulated availability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful replaces so far.
    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    /// Current body of `name`, bypassing availability.
    pub fn document(&self, name: &str) -> Option<String> {
        self.collection
            .read()
            .ok()
            .and_then(|collection| collection.documents.get(name).cloned())
    }

    /// Current collection revision.
    pub fn revision(&self) -> u64 {
        self.collection
            .read()
            .map(|collection| collection.revision)
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), RemoteError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("simulated outage".into()))
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn list(&self) -> Result<Listing, RemoteError> {
        self.ensure_available()?;
        let collection = self
            .collection
            .read()
            .map_err(|_| RemoteError::Unavailable("lock poisoned during list".into()))?;

        let documents = collection
            .documents
            .iter()
            .map(|(name, body)| {
                let body = (!self.deferred_bodies).then(|| body.clone());
                (name.clone(), body)
            })
            .collect();

        Ok(Listing {
            revision: Some(collection.revision.to_string()),
            documents,
        })
    }

    fn fetch(&self, name: &str) -> Result<String, RemoteError> {
        self.ensure_available()?;
        let collection = self
            .collection
            .read()
            .map_err(|_| RemoteError::Unavailable("lock poisoned during fetch".into()))?;
        collection
            .documents
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))
    }

    fn replace(
        &self,
        name: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        self.ensure_available()?;
        if let Some(limit) = self.max_document_bytes {
            if content.len() > limit {
                return Err(RemoteError::Unavailable(format!(
                    "document {} is {} bytes, limit is {}",
                    name,
                    content.len(),
                    limit
                )));
            }
        }

        let mut collection = self
            .collection
            .write()
            .map_err(|_| RemoteError::Unavailable("lock poisoned during replace".into()))?;

        let actual = collection.revision.to_string();
        if let Some(expected) = expected_revision {
            if expected != actual {
                return Err(RemoteError::Conflict {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        collection
            .documents
            .insert(name.to_string(), content.to_string());
        collection.revision += 1;
        self.replaces.fetch_add(1, Ordering::SeqCst);

        Ok(Some(collection.revision.to_string()))
    }
}
