use super::InMemoryCollection;
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::store::{DocumentStoreProvider, StoreCollection};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory implementation of a document store.
///
/// # Purpose
/// `InMemoryStore` keeps every collection in memory using concurrent data
/// structures. It is the default store and the one used by the test suites.
///
/// # Characteristics
/// - **Thread-Safe**: collections live in a `DashMap` and use skip lists
/// - **Shared**: clones share state, so a database reopened on a clone of the
///   store sees everything written before, the way a restarted process would
///   see a durable store
/// - **No Persistence**: all data is lost when the store is closed
///
/// # Usage
/// ```text
/// let store = InMemoryStore::new();
/// let db = Mago::builder().store(store.clone()).open()?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<InMemoryStoreInner>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore {
            inner: Arc::new(InMemoryStoreInner::new()),
        }
    }
}

impl DocumentStoreProvider for InMemoryStore {
    fn open_collection(&self, name: &str) -> MagoResult<StoreCollection> {
        self.inner.open_collection(name)
    }

    fn has_collection(&self, name: &str) -> MagoResult<bool> {
        self.inner.has_collection(name)
    }

    fn collection_names(&self) -> MagoResult<HashSet<String>> {
        self.inner.collection_names()
    }

    fn close(&self) -> MagoResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> MagoResult<bool> {
        Ok(self.inner.closed.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
struct InMemoryStoreInner {
    closed: AtomicBool,
    collection_registry: DashMap<String, InMemoryCollection>,
}

impl InMemoryStoreInner {
    fn new() -> InMemoryStoreInner {
        InMemoryStoreInner {
            closed: AtomicBool::from(false),
            collection_registry: DashMap::new(),
        }
    }

    fn check_opened(&self) -> MagoResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Store is closed");
            return Err(MagoError::new("Store is closed", ErrorKind::InvalidOperation));
        }
        Ok(())
    }

    fn open_collection(&self, name: &str) -> MagoResult<StoreCollection> {
        self.check_opened()?;
        if name.is_empty() {
            log::error!("Collection name cannot be empty");
            return Err(MagoError::new(
                "Collection name cannot be empty",
                ErrorKind::ValidationError,
            ));
        }

        let collection = self
            .collection_registry
            .entry(name.to_string())
            .or_insert_with(|| {
                log::debug!("Creating in-memory collection {}", name);
                InMemoryCollection::new(name)
            })
            .value()
            .clone();
        Ok(StoreCollection::new(collection))
    }

    fn has_collection(&self, name: &str) -> MagoResult<bool> {
        self.check_opened()?;
        Ok(self.collection_registry.contains_key(name))
    }

    fn collection_names(&self) -> MagoResult<HashSet<String>> {
        self.check_opened()?;
        Ok(self
            .collection_registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn close(&self) -> MagoResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        for entry in self.collection_registry.iter() {
            entry.value().close();
        }
        self.collection_registry.clear();
        log::debug!("In-memory store closed");
        Ok(())
    }
}
