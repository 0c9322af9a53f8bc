use crate::collection::{Document, EntityId};
use crate::errors::MagoResult;
use crate::filter::Filter;
use std::ops::Deref;
use std::sync::Arc;

/// Low-level interface of a single keyed collection in a store.
///
/// # Purpose
/// These are the persistence primitives the core needs: insert, full replace,
/// delete and point lookup by identifier, plus a filtered scan used to
/// enumerate transaction log records.
///
/// # Contract
/// - `insert` fails with `PersistenceFailure` if the id is already present.
/// - `replace` fails with `NotFound` if the id is absent.
/// - `remove` of an absent id is not an error and returns `None`.
pub trait StoreCollectionProvider: Send + Sync {
    /// Inserts a new document under `id`.
    fn insert(&self, id: &EntityId, document: Document) -> MagoResult<()>;

    /// Replaces the whole document stored under `id`.
    fn replace(&self, id: &EntityId, document: Document) -> MagoResult<()>;

    /// Removes the document stored under `id`, returning it if it existed.
    fn remove(&self, id: &EntityId) -> MagoResult<Option<Document>>;

    /// Looks up the document stored under `id`.
    fn get(&self, id: &EntityId) -> MagoResult<Option<Document>>;

    /// Returns every document accepted by `filter`, in id order.
    fn find(&self, filter: &Filter) -> MagoResult<Vec<Document>>;

    fn size(&self) -> MagoResult<u64>;

    fn name(&self) -> String;
}

/// A cloneable handle to a [StoreCollectionProvider].
#[derive(Clone)]
pub struct StoreCollection {
    inner: Arc<dyn StoreCollectionProvider>,
}

impl Deref for StoreCollection {
    type Target = Arc<dyn StoreCollectionProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl StoreCollection {
    /// Creates a new `StoreCollection` wrapping a provider implementation.
    pub fn new<T: StoreCollectionProvider + 'static>(inner: T) -> Self {
        StoreCollection {
            inner: Arc::new(inner),
        }
    }
}
