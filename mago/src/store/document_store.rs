use crate::errors::MagoResult;
use crate::store::StoreCollection;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

/// Low-level interface of a durable document store.
///
/// # Purpose
/// Defines the contract a storage backend must fulfil so sessions and
/// transactions can persist entities. A store is a set of named collections,
/// each a keyed map from [EntityId](crate::collection::EntityId) to
/// [Document](crate::collection::Document).
///
/// # Guarantees
/// The store offers no multi-document atomicity. Every write through a
/// [StoreCollection] is assumed to be durable once it returns `Ok`; that is the
/// only property the transaction log relies on.
///
/// # Implementations
/// - `InMemoryStore`: in-memory storage, shared between clones
///
/// # Thread Safety
/// Implementers must be `Send + Sync`.
pub trait DocumentStoreProvider: Send + Sync {
    /// Opens the named collection, creating it if it does not exist.
    fn open_collection(&self, name: &str) -> MagoResult<StoreCollection>;

    /// Checks if a collection with the given name exists.
    fn has_collection(&self, name: &str) -> MagoResult<bool>;

    /// Returns the names of all collections in the store.
    fn collection_names(&self) -> MagoResult<HashSet<String>>;

    /// Closes the store. Further operations fail with `InvalidOperation`.
    fn close(&self) -> MagoResult<()>;

    fn is_closed(&self) -> MagoResult<bool>;
}

/// A cloneable handle to a [DocumentStoreProvider].
///
/// Cloning is cheap and every clone talks to the same backend.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<dyn DocumentStoreProvider>,
}

impl Deref for DocumentStore {
    type Target = Arc<dyn DocumentStoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DocumentStore {
    /// Creates a new `DocumentStore` wrapping a provider implementation.
    pub fn new<T: DocumentStoreProvider + 'static>(inner: T) -> Self {
        DocumentStore {
            inner: Arc::new(inner),
        }
    }
}
