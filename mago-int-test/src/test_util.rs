use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use mago::collection::{Document, EntityId};
use mago::doc;
use mago::errors::{ErrorKind, MagoError, MagoResult};
use mago::filter::Filter;
use mago::mago::Mago;
use mago::store::memory::InMemoryStore;
use mago::store::{DocumentStoreProvider, StoreCollection, StoreCollectionProvider};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Runs a test between a setup and a teardown step.
///
/// The teardown runs even when the test fails. Any error or panic fails the
/// test with the captured message and backtrace.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> MagoResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> MagoResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> MagoResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();
    let result = std::panic::catch_unwind(|| {
        let backtrace = Backtrace::capture();
        match before() {
            Ok(ctx) => match test(ctx.clone()) {
                Ok(_) => match after(ctx) {
                    Ok(_) => Ok(()),
                    Err(e) => Err((format!("After run failed: {:?}", e), backtrace.to_string())),
                },
                Err(e) => {
                    let _ = after(ctx);
                    Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                }
            },
            Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
        }
    });

    let failure = match result {
        Ok(Ok(_)) => return,
        Ok(Err((e, bt))) => (e, bt),
        Err(panic_err) => {
            let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            (format!("Panic: {}", err_msg), Backtrace::capture().to_string())
        }
    };

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Took {:?}", start_time.elapsed());
    eprintln!("Error: {}", failure.0);
    if !failure.1.is_empty() && !failure.1.contains("disabled") {
        eprintln!("\nBacktrace:\n{}", failure.1);
    }
    eprintln!("=====================================================\n");
    panic!("Test failed. Error: {}", failure.0);
}

/// A database opened for one test, plus the handles needed to reopen it.
#[derive(Clone)]
pub struct TestContext {
    name: String,
    db: Mago,
    store: InMemoryStore,
    faults: Option<FaultPlan>,
}

impl TestContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> Mago {
        self.db.clone()
    }

    /// Fault controls, present when the context was created over a [`FaultyStore`].
    pub fn faults(&self) -> FaultPlan {
        match &self.faults {
            Some(faults) => faults.clone(),
            None => panic!("test context {} has no faulty store", self.name),
        }
    }

    /// Opens a second database over the same stored data, as a restarted
    /// process would. The first handle is left as it is.
    pub fn restart(&self) -> MagoResult<Mago> {
        Mago::builder().store(self.store.clone()).open()
    }

    pub fn restart_without_recovery(&self) -> MagoResult<Mago> {
        Mago::builder()
            .store(self.store.clone())
            .recover_on_open(false)
            .open()
    }
}

pub fn create_test_context() -> MagoResult<TestContext> {
    let store = InMemoryStore::new();
    let db = Mago::builder().store(store.clone()).open()?;
    Ok(TestContext {
        name: uuid::Uuid::new_v4().to_string(),
        db,
        store,
        faults: None,
    })
}

/// Creates a context whose database writes through a [`FaultyStore`].
pub fn create_faulty_test_context() -> MagoResult<TestContext> {
    let store = InMemoryStore::new();
    let faults = FaultPlan::new();
    let db = Mago::builder()
        .store(FaultyStore::new(store.clone(), faults.clone()))
        .open()?;
    Ok(TestContext {
        name: uuid::Uuid::new_v4().to_string(),
        db,
        store,
        faults: Some(faults),
    })
}

pub fn cleanup(ctx: TestContext) -> MagoResult<()> {
    ctx.db().close()
}

pub fn random_person() -> Document {
    doc! {
        first_name: (FirstName().fake::<String>()),
        last_name: (LastName().fake::<String>()),
        balance: 100,
    }
}

/// Shared switch deciding which store write fails.
///
/// Writes are `insert`, `replace` and `remove`. Counting starts when a
/// fault is armed.
#[derive(Clone, Default)]
pub struct FaultPlan {
    inner: Arc<FaultPlanInner>,
}

#[derive(Default)]
struct FaultPlanInner {
    writes: AtomicUsize,
    fail_at: Mutex<Vec<usize>>,
    crashed: AtomicBool,
    sticky: AtomicBool,
}

impl FaultPlan {
    pub fn new() -> Self {
        FaultPlan::default()
    }

    /// Fails only the `n`-th write from now (1-based).
    pub fn fail_write(&self, n: usize) {
        self.arm(&[n], false);
    }

    /// Fails each of the listed writes from now (1-based), and no others.
    pub fn fail_writes(&self, writes: &[usize]) {
        self.arm(writes, false);
    }

    /// Fails the `n`-th write from now and every write after it, like a
    /// process that died at that point.
    pub fn crash_at_write(&self, n: usize) {
        self.arm(&[n], true);
    }

    /// Disarms every fault.
    pub fn heal(&self) {
        self.inner.fail_at.lock().clear();
        self.inner.crashed.store(false, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn arm(&self, writes: &[usize], sticky: bool) {
        let mut fail_at = self.inner.fail_at.lock();
        self.inner.writes.store(0, Ordering::SeqCst);
        self.inner.crashed.store(false, Ordering::SeqCst);
        self.inner.sticky.store(sticky, Ordering::SeqCst);
        *fail_at = writes.to_vec();
    }

    fn check_write(&self, operation: &str, collection: &str) -> MagoResult<()> {
        if self.inner.crashed.load(Ordering::SeqCst) {
            return Err(injected(operation, collection));
        }

        let count = self.inner.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut fail_at = self.inner.fail_at.lock();
        if let Some(position) = fail_at.iter().position(|n| *n == count) {
            if self.inner.sticky.load(Ordering::SeqCst) {
                self.inner.crashed.store(true, Ordering::SeqCst);
            } else {
                fail_at.remove(position);
            }
            return Err(injected(operation, collection));
        }
        Ok(())
    }
}

fn injected(operation: &str, collection: &str) -> MagoError {
    log::warn!("Injected failure of {} in {}", operation, collection);
    MagoError::new(
        &format!("Injected failure of {} in {}", operation, collection),
        ErrorKind::PersistenceFailure,
    )
}

/// A store that delegates to an [`InMemoryStore`] and fails writes on demand.
pub struct FaultyStore {
    store: InMemoryStore,
    faults: FaultPlan,
}

impl FaultyStore {
    pub fn new(store: InMemoryStore, faults: FaultPlan) -> Self {
        FaultyStore { store, faults }
    }
}

impl DocumentStoreProvider for FaultyStore {
    fn open_collection(&self, name: &str) -> MagoResult<StoreCollection> {
        let collection = self.store.open_collection(name)?;
        Ok(StoreCollection::new(FaultyCollection {
            collection,
            faults: self.faults.clone(),
        }))
    }

    fn has_collection(&self, name: &str) -> MagoResult<bool> {
        self.store.has_collection(name)
    }

    fn collection_names(&self) -> MagoResult<HashSet<String>> {
        self.store.collection_names()
    }

    fn close(&self) -> MagoResult<()> {
        self.store.close()
    }

    fn is_closed(&self) -> MagoResult<bool> {
        self.store.is_closed()
    }
}

struct FaultyCollection {
    collection: StoreCollection,
    faults: FaultPlan,
}

impl StoreCollectionProvider for FaultyCollection {
    fn insert(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.faults.check_write("insert", &self.collection.name())?;
        self.collection.insert(id, document)
    }

    fn replace(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        self.faults.check_write("replace", &self.collection.name())?;
        self.collection.replace(id, document)
    }

    fn remove(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.faults.check_write("remove", &self.collection.name())?;
        self.collection.remove(id)
    }

    fn get(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.collection.get(id)
    }

    fn find(&self, filter: &Filter) -> MagoResult<Vec<Document>> {
        self.collection.find(filter)
    }

    fn size(&self) -> MagoResult<u64> {
        self.collection.size()
    }

    fn name(&self) -> String {
        self.collection.name()
    }
}
