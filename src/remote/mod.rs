//! Remote document stores - the boundary the readings store persists through.
//!
//! A backend holds named documents in one collection. It can list them (with
//! bodies when cheap), fetch one body, and create-or-replace one document. A
//! per-document size cap is enforced by the backend, not by this crate.
//!
//! ## Example
//!
//! ```ignore
//! use enviro_readings::remote::{DocumentStore, InMemoryDocumentStore};
//!
//! let remote = InMemoryDocumentStore::new();
//! remote.replace("readings.csv", "timestamp,source_id\n", None)?;
//! let listing = remote.list()?;
//! assert_eq!(listing.names().collect::<Vec<_>>(), vec!["readings.csv"]);
//! ```

#[cfg(feature = "gist")]
mod gist;
mod in_memory;

use std::collections::BTreeMap;

use crate::error::RemoteError;

#[cfg(feature = "gist")]
pub use gist::{GistConfig, GistDocumentStore};
pub use in_memory::InMemoryDocumentStore;

/// One listing of the collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Opaque collection revision for conditional replace, if the backend has one.
    pub revision: Option<String>,
    /// Document name to body. `None` means the body was not included and must
    /// be fetched with [`DocumentStore::fetch`].
    pub documents: BTreeMap<String, Option<String>>,
}

impl Listing {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// Inline body for `name`, if the listing carried it.
    pub fn content(&self, name: &str) -> Option<&str> {
        self.documents.get(name).and_then(|body| body.as_deref())
    }
}

/// Trait for the remote document collection.
///
/// All calls are blocking. `replace` either fully replaces the document or
/// leaves the collection unchanged.
pub trait DocumentStore: Send + Sync {
    /// List every document in the collection.
    fn list(&self) -> Result<Listing, RemoteError>;

    /// Fetch the full body of one document.
    fn fetch(&self, name: &str) -> Result<String, RemoteError>;

    /// Create or replace `name` with `content`.
    ///
    /// When `expected_revision` is given and the collection has moved past it,
    /// fails with [`RemoteError::Conflict`] and writes nothing. Returns the new
    /// collection revision when the backend reports one.
    fn replace(
        &self,
        name: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<Option<String>, RemoteError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn list(&self) -> Result<Listing, RemoteError> {
        (**self).list()
    }

    fn fetch(&self, name: &str) -> Result<String, RemoteError> {
        (**self).fetch(name)
    }

    fn replace(
        &self,
        name: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        (**self).replace(name, content, expected_revision)
    }
}
