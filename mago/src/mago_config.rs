//! Configuration management for a mago database.

use crate::common::DEFAULT_TRANSACTION_COLLECTION;
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::store::memory::InMemoryStore;
use crate::store::{DocumentStore, DocumentStoreProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Configuration of a [`Mago`](crate::mago::Mago) instance.
///
/// Settings can be changed until the database is opened. After
/// initialization every setter returns [`ErrorKind::InvalidOperation`].
///
/// | Setting | Default |
/// |---------|---------|
/// | store | a fresh [`InMemoryStore`] |
/// | transaction collection | `"transaction"` |
/// | recover on open | `true` |
#[derive(Clone)]
pub struct MagoConfig {
    inner: Arc<MagoConfigInner>,
}

impl Default for MagoConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MagoConfig {
    pub fn new() -> Self {
        MagoConfig {
            inner: Arc::new(MagoConfigInner::new()),
        }
    }

    /// Returns the configured store, falling back to an in-memory one.
    pub fn store(&self) -> DocumentStore {
        self.inner.store()
    }

    pub fn set_store<T: DocumentStoreProvider + 'static>(&self, store: T) -> MagoResult<()> {
        self.inner.set_store(DocumentStore::new(store))
    }

    pub fn transaction_collection(&self) -> String {
        self.inner.transaction_collection()
    }

    pub fn set_transaction_collection(&self, name: &str) -> MagoResult<()> {
        self.inner.set_transaction_collection(name)
    }

    pub fn recover_on_open(&self) -> bool {
        self.inner.recover_on_open.load(Ordering::Relaxed)
    }

    pub fn set_recover_on_open(&self, recover: bool) -> MagoResult<()> {
        self.inner.check_not_configured("Recovery on open")?;
        self.inner.recover_on_open.store(recover, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.load(Ordering::Relaxed)
    }

    pub(crate) fn initialize(&self) -> MagoResult<()> {
        self.inner.initialize()
    }
}

struct MagoConfigInner {
    configured: AtomicBool,
    store: OnceLock<DocumentStore>,
    transaction_collection: OnceLock<String>,
    recover_on_open: AtomicBool,
}

impl MagoConfigInner {
    fn new() -> Self {
        MagoConfigInner {
            configured: AtomicBool::from(false),
            store: OnceLock::new(),
            transaction_collection: OnceLock::new(),
            recover_on_open: AtomicBool::from(true),
        }
    }

    fn check_not_configured(&self, setting: &str) -> MagoResult<()> {
        if self.configured.load(Ordering::Relaxed) {
            log::error!("{} cannot be changed after initialization", setting);
            return Err(MagoError::new(
                &format!("{} cannot be changed after initialization", setting),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn store(&self) -> DocumentStore {
        self.store
            .get_or_init(|| DocumentStore::new(InMemoryStore::new()))
            .clone()
    }

    fn set_store(&self, store: DocumentStore) -> MagoResult<()> {
        self.check_not_configured("Store")?;
        if self.store.set(store).is_err() {
            log::error!("Store is already set");
            return Err(MagoError::new("Store is already set", ErrorKind::InvalidOperation));
        }
        Ok(())
    }

    fn transaction_collection(&self) -> String {
        self.transaction_collection
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRANSACTION_COLLECTION.to_string())
    }

    fn set_transaction_collection(&self, name: &str) -> MagoResult<()> {
        self.check_not_configured("Transaction collection")?;
        if name.trim().is_empty() {
            log::error!("Transaction collection name cannot be empty");
            return Err(MagoError::new(
                "Transaction collection name cannot be empty",
                ErrorKind::ValidationError,
            ));
        }

        if self.transaction_collection.set(name.to_string()).is_err() {
            log::error!("Transaction collection is already set");
            return Err(MagoError::new(
                "Transaction collection is already set",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn initialize(&self) -> MagoResult<()> {
        if self.configured.swap(true, Ordering::Relaxed) {
            log::error!("Configuration is already initialized");
            return Err(MagoError::new(
                "Configuration is already initialized",
                ErrorKind::InvalidOperation,
            ));
        }
        // pin the default store so every later call sees the same instance
        let _ = self.store();
        Ok(())
    }
}
