use crate::collection::{CollectionRegistry, EntityCollection};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::mago_builder::MagoBuilder;
use crate::mago_config::MagoConfig;
use crate::session::Session;
use crate::store::DocumentStore;
use crate::transaction::{RecoveryReport, RecoveryScanner, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to an opened mago database.
///
/// All clones share the same collections and store. Opening a database with
/// `recover_on_open` enabled (the default) settles every transaction record
/// left behind by an earlier process before the handle is returned.
///
/// ```rust,ignore
/// let db = Mago::builder().open()?;
/// let users = db.collection("users")?;
/// let session = db.session()?;
/// let user = users.create(doc! { name: "Alice" })?;
/// session.add(&user)?;
/// session.commit()?;
/// db.close()?;
/// ```
#[derive(Clone)]
pub struct Mago {
    inner: Arc<MagoInner>,
}

impl Mago {
    pub fn builder() -> MagoBuilder {
        MagoBuilder::new()
    }

    pub(crate) fn new(config: MagoConfig) -> Self {
        Mago {
            inner: Arc::new(MagoInner::new(config)),
        }
    }

    pub(crate) fn initialize(&self) -> MagoResult<()> {
        self.inner.initialize()
    }

    /// Returns the named collection, creating it on first use.
    pub fn collection(&self, name: &str) -> MagoResult<EntityCollection> {
        self.inner.check_opened()?;
        self.inner.registry.collection(name)
    }

    /// Starts a new session.
    pub fn session(&self) -> MagoResult<Session> {
        self.inner.check_opened()?;
        Ok(Session::new(
            self.inner.registry.clone(),
            &self.inner.config.transaction_collection(),
        ))
    }

    /// Runs `func` in a new session and closes the session afterwards.
    ///
    /// Nothing is committed implicitly. Changes not committed by `func` stay in
    /// memory on the entities and are never written.
    pub fn with_session<F, R>(&self, func: F) -> MagoResult<R>
    where
        F: FnOnce(&Session) -> MagoResult<R>,
    {
        let session = self.session()?;
        let result = func(&session);
        let closed = session.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Starts an empty transaction logging to the configured transaction collection.
    pub fn begin_transaction(&self) -> MagoResult<Transaction> {
        self.inner.check_opened()?;
        let log = self.inner.log_collection()?;
        Ok(Transaction::new(log, self.inner.registry.clone()))
    }

    /// Runs the recovery scanner over the transaction collection.
    pub fn recover(&self) -> MagoResult<RecoveryReport> {
        self.inner.check_opened()?;
        self.inner.recover()
    }

    pub fn registry(&self) -> CollectionRegistry {
        self.inner.registry.clone()
    }

    pub fn store(&self) -> DocumentStore {
        self.inner.registry.store()
    }

    pub fn config(&self) -> MagoConfig {
        self.inner.config.clone()
    }

    /// Closes the database and its store. Closing twice is a no-op.
    pub fn close(&self) -> MagoResult<()> {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

struct MagoInner {
    config: MagoConfig,
    registry: CollectionRegistry,
    closed: AtomicBool,
}

impl MagoInner {
    fn new(config: MagoConfig) -> Self {
        let registry = CollectionRegistry::new(config.store());
        MagoInner {
            config,
            registry,
            closed: AtomicBool::from(false),
        }
    }

    fn initialize(&self) -> MagoResult<()> {
        if self.registry.store().is_closed()? {
            log::error!("Cannot open a database on a closed store");
            return Err(MagoError::new(
                "Cannot open a database on a closed store",
                ErrorKind::InvalidOperation,
            ));
        }

        if self.config.recover_on_open() {
            let report = self.recover()?;
            for (id, error) in report.failed.iter() {
                log::warn!("Transaction {} is still unsettled after open: {}", id, error);
            }
        }
        log::debug!("Database opened");
        Ok(())
    }

    fn check_opened(&self) -> MagoResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Database is closed");
            return Err(MagoError::new("Database is closed", ErrorKind::InvalidOperation));
        }
        Ok(())
    }

    fn log_collection(&self) -> MagoResult<EntityCollection> {
        self.registry.collection(&self.config.transaction_collection())
    }

    fn recover(&self) -> MagoResult<RecoveryReport> {
        let log = self.log_collection()?;
        RecoveryScanner::new(log, self.registry.clone()).run()
    }

    fn close(&self) -> MagoResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.registry.store().close()?;
        log::debug!("Database closed");
        Ok(())
    }
}
