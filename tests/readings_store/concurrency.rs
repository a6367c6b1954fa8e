//! Conditional writes: a competing writer between list and replace.

use std::sync::atomic::{AtomicUsize, Ordering};

use enviro_readings::remote::{DocumentStore, InMemoryDocumentStore, Listing};
use enviro_readings::{RemoteError, SchemaNormalizer, StoreError};

use crate::support::{reading, readings, store_over};

/// Lets another writer append to `s.csv` right before our replace, for the
/// first `races` replaces.
struct RacingRemote {
    inner: InMemoryDocumentStore,
    races: usize,
    replaces: AtomicUsize,
    competitor_minute: AtomicUsize,
}

impl RacingRemote {
    fn new(inner: InMemoryDocumentStore, races: usize) -> Self {
        Self {
            inner,
            races,
            replaces: AtomicUsize::new(0),
            competitor_minute: AtomicUsize::new(30),
        }
    }

    fn compete(&self) {
        let normalizer = SchemaNormalizer::new("enviro");
        let mut rows = normalizer
            .parse_shard("s.csv", &self.inner.fetch("s.csv").unwrap_or_default())
            .unwrap();
        let minute = self.competitor_minute.fetch_add(1, Ordering::SeqCst) as u32;
        rows.push(reading(minute));
        self.inner
            .replace("s.csv", &normalizer.serialize(&rows), None)
            .unwrap();
    }
}

impl DocumentStore for RacingRemote {
    fn list(&self) -> Result<Listing, RemoteError> {
        self.inner.list()
    }

    fn fetch(&self, name: &str) -> Result<String, RemoteError> {
        self.inner.fetch(name)
    }

    fn replace(
        &self,
        name: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        if self.replaces.fetch_add(1, Ordering::SeqCst) < self.races {
            self.compete();
        }
        self.inner.replace(name, content, expected_revision)
    }
}

#[test]
fn conflict_re_derives_append_from_fresh_state() {
    let inner = InMemoryDocumentStore::new();
    store_over(inner.clone(), 10).append(&[reading(1)]).unwrap();

    let store = store_over(RacingRemote::new(inner.clone(), 1), 10);
    assert_eq!(store.append(&[reading(2)]).unwrap(), 1);

    // neither writer's row was lost
    assert_eq!(
        store_over(inner, 10).load_all().unwrap(),
        vec![reading(1), reading(30), reading(2)]
    );
}

#[test]
fn conflict_retries_are_bounded() {
    let inner = InMemoryDocumentStore::new();
    store_over(inner.clone(), 10).append(&readings(1..=1)).unwrap();

    // default budget is three retries, so four races exhaust it
    let remote = RacingRemote::new(inner.clone(), usize::MAX);
    let store = store_over(remote, 10);
    assert!(matches!(
        store.append(&[reading(2)]),
        Err(StoreError::Conflict { .. })
    ));
    assert_eq!(store.remote().replaces.load(Ordering::SeqCst), 4);

    let rows = store_over(inner, 10).load_all().unwrap();
    assert!(!rows.contains(&reading(2)));
    assert_eq!(rows.len(), 5);
}
