use crate::collection::EntityCollection;
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::store::DocumentStore;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps collection names to their [EntityCollection].
///
/// The registry is how code that only knows a collection by name (a
/// transaction log record, the recovery scanner) gets back to the persistence
/// primitives of that collection. It is an explicit object handed to whoever
/// needs it; there is no process-wide table.
///
/// Collections are opened lazily from the backing store on first lookup and
/// cached afterwards.
#[derive(Clone)]
pub struct CollectionRegistry {
    inner: Arc<CollectionRegistryInner>,
}

struct CollectionRegistryInner {
    store: DocumentStore,
    collections: DashMap<String, EntityCollection>,
}

impl CollectionRegistry {
    pub fn new(store: DocumentStore) -> Self {
        CollectionRegistry {
            inner: Arc::new(CollectionRegistryInner {
                store,
                collections: DashMap::new(),
            }),
        }
    }

    /// Returns the collection named `name`, opening it in the store if needed.
    pub fn collection(&self, name: &str) -> MagoResult<EntityCollection> {
        if let Some(collection) = self.inner.collections.get(name) {
            return Ok(collection.value().clone());
        }

        if name.is_empty() {
            log::error!("Collection name cannot be empty");
            return Err(MagoError::new(
                "Collection name cannot be empty",
                ErrorKind::ValidationError,
            ));
        }

        let store_collection = self.inner.store.open_collection(name)?;
        let collection = self
            .inner
            .collections
            .entry(name.to_string())
            .or_insert_with(|| EntityCollection::new(name, store_collection))
            .value()
            .clone();
        Ok(collection)
    }

    /// Returns the collection named `name` only if it was already resolved.
    pub fn get(&self, name: &str) -> Option<EntityCollection> {
        self.inner.collections.get(name).map(|c| c.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.collections.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn store(&self) -> DocumentStore {
        self.inner.store.clone()
    }
}
