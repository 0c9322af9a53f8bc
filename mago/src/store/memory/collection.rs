use crate::collection::{Document, EntityId};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::filter::Filter;
use crate::store::StoreCollectionProvider;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory collection backed by a concurrent skip list.
///
/// # Characteristics
/// - **Ordered**: documents are kept in [EntityId] order, so scans are stable
/// - **Thread-Safe**: clones share the same backing map
/// - **Atomic single writes**: insert and replace check and write under one lock
///
/// # Usage
/// Obtained through `DocumentStore::open_collection()`:
/// ```text
/// let store = InMemoryStore::new();
/// let users = store.open_collection("users")?;
/// users.insert(&id, doc)?;
/// ```
#[derive(Clone)]
pub struct InMemoryCollection {
    inner: Arc<InMemoryCollectionInner>,
}

impl InMemoryCollection {
    pub(crate) fn new(name: &str) -> Self {
        InMemoryCollection {
            inner: Arc::new(InMemoryCollectionInner::new(name)),
        }
    }

    pub(crate) fn close(&self) {
        self.inner.close()
    }
}

impl StoreCollectionProvider for InMemoryCollection {
    fn insert(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.inner.insert(id, document)
    }

    fn replace(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.inner.replace(id, document)
    }

    fn remove(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.inner.remove(id)
    }

    fn get(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.inner.get(id)
    }

    fn find(&self, filter: &Filter) -> MagoResult<Vec<Document>> {
        self.inner.find(filter)
    }

    fn size(&self) -> MagoResult<u64> {
        self.inner.size()
    }

    fn name(&self) -> String {
        self.inner.name.clone()
    }
}

struct InMemoryCollectionInner {
    backing_map: SkipMap<EntityId, Document>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
    name: String,
}

impl InMemoryCollectionInner {
    fn new(name: &str) -> InMemoryCollectionInner {
        InMemoryCollectionInner {
            backing_map: SkipMap::new(),
            write_lock: Mutex::new(()),
            closed: AtomicBool::from(false),
            name: name.to_string(),
        }
    }

    fn check_opened(&self) -> MagoResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Collection {} is closed", self.name);
            return Err(MagoError::new(
                &format!("Collection {} is closed", self.name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn insert(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.check_opened()?;
        let _guard = self.write_lock.lock();

        if self.backing_map.contains_key(id) {
            log::error!("Document with id {} already exists in {}", id, self.name);
            return Err(MagoError::new(
                &format!("Document with id {} already exists in {}", id, self.name),
                ErrorKind::PersistenceFailure,
            ));
        }

        self.backing_map.insert(*id, document);
        Ok(())
    }

    fn replace(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.check_opened()?;
        let _guard = self.write_lock.lock();

        if !self.backing_map.contains_key(id) {
            log::error!("Document with id {} not found in {}", id, self.name);
            return Err(MagoError::new(
                &format!("Document with id {} not found in {}", id, self.name),
                ErrorKind::NotFound,
            ));
        }

        self.backing_map.insert(*id, document);
        Ok(())
    }

    fn remove(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.check_opened()?;
        let _guard = self.write_lock.lock();
        Ok(self.backing_map.remove(id).map(|entry| entry.value().clone()))
    }

    fn get(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.check_opened()?;
        Ok(self.backing_map.get(id).map(|entry| entry.value().clone()))
    }

    fn find(&self, filter: &Filter) -> MagoResult<Vec<Document>> {
        self.check_opened()?;
        let mut result = Vec::new();
        for entry in self.backing_map.iter() {
            if filter.apply(entry.value())? {
                result.push(entry.value().clone());
            }
        }
        Ok(result)
    }

    fn size(&self) -> MagoResult<u64> {
        self.check_opened()?;
        Ok(self.backing_map.len() as u64)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.backing_map.clear();
    }
}
