use super::core::{BeforeImage, LifecycleState};
use crate::collection::{CollectionRegistry, Document, Entity, EntityCollection, EntityId};
use crate::common::{Value, DOC_ID, DOC_IN_FLIGHT, TX_DEL, TX_NEW, TX_STATE, TX_UPDATE};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

/// A crash-recoverable batch of inserts, updates and deletes across collections.
///
/// # Purpose
/// The store has no multi-document atomicity. A `Transaction` makes a batch
/// resumable instead: it is itself persisted as a log record in the
/// transaction collection *before* any of its effects, and every entity it
/// writes carries the transaction id in its in-flight marker (`_trans`) until
/// the batch is settled.
///
/// # Lifecycle
/// 1. `initial` - groupings are being built; nothing is written.
/// 2. `pending` - the record is persisted, new and updated entities are
///    written with the marker, deletes are applied.
/// 3. `commit` - the marker is removed from every written entity.
/// 4. `finished` - the record is marked finished and then deleted.
///
/// Every step can be repeated safely. An entity whose stored attributes
/// already match is not rewritten, and the marker is only removed from
/// documents that still carry it.
///
/// # Persisted shape
/// ```text
/// { _id, new: { <collection>: [<document>...] },
///        update: { <collection>: [<document>...] },
///        del: { <collection>: [<id>...] },
///        state: "initial" | "pending" | "commit" | "finished" }
/// ```
///
/// # Usage
/// ```text
/// let tx = db.begin_transaction()?;
/// tx.insert(&order)?;
/// tx.update(&account)?;
/// tx.remove(&cart)?;
/// tx.commit()?;
/// ```
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Creates an empty transaction that logs to `log`.
    pub fn new(log: EntityCollection, registry: CollectionRegistry) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner::new(
                EntityId::new(),
                log,
                registry,
                TransactionState::new(LifecycleState::Initial, Plan::default(), false),
            )),
        }
    }

    /// Rebuilds a transaction from its persisted log record.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ObjectMappingError`] if the record does not have the persisted shape.
    pub fn from_record(record: &Document, log: EntityCollection, registry: CollectionRegistry) -> MagoResult<Self> {
        let id = match record.id() {
            Some(id) => id,
            None => return Err(malformed("record has no id")),
        };

        let lifecycle: LifecycleState = match record.get(TX_STATE).and_then(|v| v.as_string()) {
            Some(state) => state.parse()?,
            None => return Err(malformed("record has no state")),
        };

        let plan = Plan::from_record(record)?;
        Ok(Transaction {
            inner: Arc::new(TransactionInner::new(
                id,
                log,
                registry,
                TransactionState::new(lifecycle, plan, true),
            )),
        })
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().lifecycle
    }

    /// Returns `true` once the transaction finished, was rolled back or recovered.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Schedules `entity` for insertion, assigning it an id if it has none.
    pub fn insert(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.stage(Grouping::New, entity)
    }

    pub fn insert_all<'a, I: IntoIterator<Item = &'a Entity>>(&self, entities: I) -> MagoResult<()> {
        for entity in entities {
            self.insert(entity)?;
        }
        Ok(())
    }

    /// Schedules a full replace of the stored attributes of `entity`.
    pub fn update(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.stage(Grouping::Update, entity)
    }

    pub fn update_all<'a, I: IntoIterator<Item = &'a Entity>>(&self, entities: I) -> MagoResult<()> {
        for entity in entities {
            self.update(entity)?;
        }
        Ok(())
    }

    /// Schedules removal of `entity` from its collection.
    pub fn remove(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.stage(Grouping::Delete, entity)
    }

    pub fn remove_all<'a, I: IntoIterator<Item = &'a Entity>>(&self, entities: I) -> MagoResult<()> {
        for entity in entities {
            self.remove(entity)?;
        }
        Ok(())
    }

    /// Persists the log record in `initial` state without touching any entity.
    pub fn save(&self) -> MagoResult<()> {
        self.inner.save()
    }

    /// Persists the record as `pending`, writes new and updated entities with
    /// the in-flight marker and applies the deletes.
    pub fn to_pending(&self) -> MagoResult<()> {
        self.inner.to_pending()
    }

    /// Persists the record as `commit` and removes the in-flight marker from
    /// every written entity.
    pub fn to_commit(&self) -> MagoResult<()> {
        self.inner.to_commit()
    }

    /// Runs the whole lifecycle and deletes the log record.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::TransactionFailed`] if a step failed and its effects were
    ///   rolled back. The cause is attached.
    /// - [`ErrorKind::RecoveryRequired`] if a step failed and the rollback failed
    ///   too. The log record may still exist; run the recovery scanner.
    pub fn commit(&self) -> MagoResult<()> {
        self.inner.commit()
    }

    /// Undoes the inserts and updates written so far, re-applies the deletes
    /// and deletes the log record.
    ///
    /// A record past `pending` is first rewritten as `pending`. If the
    /// rollback then fails halfway, recovery re-applies the whole batch.
    pub fn rollback(&self) -> MagoResult<()> {
        self.inner.rollback()
    }

    /// Drives the transaction forward to `finished` from whatever state it is in.
    pub fn recover(&self) -> MagoResult<()> {
        self.inner.recover()
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &state.lifecycle)
            .field("closed", &state.closed)
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Grouping {
    New,
    Update,
    Delete,
}

/// Target documents (attributes plus `_id`) and deleted ids, by collection.
#[derive(Default, Clone)]
struct Plan {
    new: IndexMap<String, Vec<Document>>,
    update: IndexMap<String, Vec<Document>>,
    del: IndexMap<String, Vec<EntityId>>,
}

impl Plan {
    fn writes(&self) -> Vec<(String, Document)> {
        self.new
            .iter()
            .chain(self.update.iter())
            .flat_map(|(name, documents)| documents.iter().map(move |doc| (name.clone(), doc.clone())))
            .collect()
    }

    fn deletes(&self) -> Vec<(String, EntityId)> {
        self.del
            .iter()
            .flat_map(|(name, ids)| ids.iter().map(move |id| (name.clone(), *id)))
            .collect()
    }

    fn to_record(&self, id: EntityId, lifecycle: LifecycleState) -> MagoResult<Document> {
        let mut record = Document::new();
        record.put(DOC_ID, id)?;
        record.put(TX_NEW, Self::documents_value(&self.new)?)?;
        record.put(TX_UPDATE, Self::documents_value(&self.update)?)?;

        let mut del = Document::new();
        for (name, ids) in self.del.iter() {
            del.put(name.as_str(), ids.iter().map(|id| Value::Id(*id)).collect::<Vec<Value>>())?;
        }
        record.put(TX_DEL, del)?;
        record.put(TX_STATE, lifecycle.as_str())?;
        Ok(record)
    }

    fn documents_value(grouping: &IndexMap<String, Vec<Document>>) -> MagoResult<Document> {
        let mut value = Document::new();
        for (name, documents) in grouping.iter() {
            value.put(name.as_str(), documents.clone())?;
        }
        Ok(value)
    }

    fn from_record(record: &Document) -> MagoResult<Plan> {
        let mut plan = Plan::default();
        for (key, target) in [(TX_NEW, &mut plan.new), (TX_UPDATE, &mut plan.update)] {
            for (name, value) in Self::grouping(record, key)?.iter() {
                let items = value
                    .as_array()
                    .ok_or_else(|| malformed(&format!("{}.{} is not an array", key, name)))?;
                let mut documents = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_document() {
                        Some(doc) if doc.id().is_some() => documents.push(doc.clone()),
                        _ => return Err(malformed(&format!("{}.{} holds an entry without id", key, name))),
                    }
                }
                target.insert(name.clone(), documents);
            }
        }

        for (name, value) in Self::grouping(record, TX_DEL)?.iter() {
            let items = value
                .as_array()
                .ok_or_else(|| malformed(&format!("{}.{} is not an array", TX_DEL, name)))?;
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item.as_id() {
                    Some(id) => ids.push(*id),
                    None => return Err(malformed(&format!("{}.{} holds a non-id entry", TX_DEL, name))),
                }
            }
            plan.del.insert(name.clone(), ids);
        }
        Ok(plan)
    }

    fn grouping(record: &Document, key: &str) -> MagoResult<Document> {
        match record.get(key) {
            None | Some(Value::Null) => Ok(Document::new()),
            Some(Value::Document(doc)) => Ok(doc.clone()),
            Some(_) => Err(malformed(&format!("{} is not a document", key))),
        }
    }
}

fn malformed(detail: &str) -> MagoError {
    log::error!("Malformed transaction record: {}", detail);
    MagoError::new(
        &format!("Malformed transaction record: {}", detail),
        ErrorKind::ObjectMappingError,
    )
}

struct TransactionState {
    lifecycle: LifecycleState,
    closed: bool,
    // entities staged while building, turned into the plan on first persist
    staged: Vec<(Grouping, Entity)>,
    frozen: bool,
    plan: Plan,
    entities: HashMap<EntityId, Entity>,
    before_images: Vec<BeforeImage>,
    captured: HashSet<(String, EntityId)>,
}

impl TransactionState {
    fn new(lifecycle: LifecycleState, plan: Plan, frozen: bool) -> Self {
        TransactionState {
            lifecycle,
            closed: false,
            staged: Vec::new(),
            frozen,
            plan,
            entities: HashMap::new(),
            before_images: Vec::new(),
            captured: HashSet::new(),
        }
    }
}

struct TransactionInner {
    id: EntityId,
    marker: String,
    log: EntityCollection,
    registry: CollectionRegistry,
    state: Mutex<TransactionState>,
}

impl TransactionInner {
    fn new(id: EntityId, log: EntityCollection, registry: CollectionRegistry, state: TransactionState) -> Self {
        TransactionInner {
            id,
            marker: id.to_string(),
            log,
            registry,
            state: Mutex::new(state),
        }
    }

    fn check_open(&self, state: &TransactionState) -> MagoResult<()> {
        if state.closed {
            log::error!("Transaction {} is closed", self.id);
            return Err(MagoError::new("Transaction is closed", ErrorKind::InvalidOperation));
        }
        Ok(())
    }

    fn check_state(&self, state: &TransactionState, allowed: &[LifecycleState]) -> MagoResult<()> {
        self.check_open(state)?;
        if !allowed.contains(&state.lifecycle) {
            log::error!("Transaction {} cannot do this in state {}", self.id, state.lifecycle);
            return Err(MagoError::new(
                &format!("Transaction is in state {}", state.lifecycle),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn stage(&self, grouping: Grouping, entity: &Entity) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_state(&state, &[LifecycleState::Initial])?;
        if state.frozen {
            log::error!("Transaction {} was already saved", self.id);
            return Err(MagoError::new(
                "Transaction was already saved and cannot take more entities",
                ErrorKind::InvalidOperation,
            ));
        }

        if entity.id().is_none() {
            if grouping != Grouping::New {
                log::error!("Cannot update or remove an entity that was never saved");
                return Err(MagoError::new(
                    "Cannot update or remove an entity that was never saved",
                    ErrorKind::InvalidOperation,
                ));
            }
            entity.assign_id(EntityId::new());
        }

        if !state.staged.iter().any(|(g, e)| *g == grouping && e.same_as(entity)) {
            state.staged.push((grouping, entity.clone()));
        }
        Ok(())
    }

    fn freeze(&self, state: &mut TransactionState) -> MagoResult<()> {
        if state.frozen {
            return Ok(());
        }

        for (grouping, entity) in std::mem::take(&mut state.staged) {
            let name = entity.collection_name();
            let id = match entity.id() {
                Some(id) => id,
                None => return Err(MagoError::new("Staged entity lost its id", ErrorKind::InternalError)),
            };

            match grouping {
                Grouping::Delete => state.plan.del.entry(name).or_default().push(id),
                Grouping::New | Grouping::Update => {
                    let mut target = entity.attributes();
                    target.put(DOC_ID, id)?;
                    let bucket = if grouping == Grouping::New {
                        &mut state.plan.new
                    } else {
                        &mut state.plan.update
                    };
                    bucket.entry(name).or_default().push(target);
                    state.entities.insert(id, entity);
                }
            }
        }
        state.frozen = true;
        Ok(())
    }

    fn persist(&self, state: &TransactionState) -> MagoResult<()> {
        let record = state.plan.to_record(self.id, state.lifecycle)?;
        self.log.upsert_document(&self.id, record)
    }

    fn save(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_state(&state, &[LifecycleState::Initial])?;
        self.freeze(&mut state)?;
        self.persist(&state)?;
        log::debug!("Transaction {} saved", self.id);
        Ok(())
    }

    fn to_pending(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_state(&state, &[LifecycleState::Initial, LifecycleState::Pending])?;
        self.freeze(&mut state)?;
        self.pending_phase(&mut state)
    }

    fn to_commit(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_state(&state, &[LifecycleState::Pending, LifecycleState::Commit])?;
        self.commit_phase(&mut state)
    }

    fn commit(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_state(&state, &[LifecycleState::Initial])?;
        self.freeze(&mut state)?;

        let result = self
            .pending_phase(&mut state)
            .and_then(|_| self.commit_phase(&mut state))
            .and_then(|_| self.finish(&mut state));

        match result {
            Ok(()) => Ok(()),
            Err(cause) => {
                log::error!("Transaction {} failed in state {}: {}", self.id, state.lifecycle, cause);
                match self.rollback_phase(&mut state) {
                    Ok(()) => Err(MagoError::new_with_cause(
                        &format!("Transaction {} failed and was rolled back", self.id),
                        ErrorKind::TransactionFailed,
                        cause,
                    )),
                    Err(rollback_error) => {
                        log::error!("Transaction {} could not be rolled back: {}", self.id, rollback_error);
                        Err(MagoError::new_with_cause(
                            &format!(
                                "Transaction {} failed and could not be rolled back, recovery is required",
                                self.id
                            ),
                            ErrorKind::RecoveryRequired,
                            cause,
                        ))
                    }
                }
            }
        }
    }

    fn rollback(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        self.rollback_phase(&mut state)
    }

    fn recover(&self) -> MagoResult<()> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        self.freeze(&mut state)?;

        log::info!("Recovering transaction {} from state {}", self.id, state.lifecycle);
        match state.lifecycle {
            LifecycleState::Initial | LifecycleState::Pending => {
                self.pending_phase(&mut state)?;
                self.commit_phase(&mut state)?;
                self.finish(&mut state)
            }
            LifecycleState::Commit => {
                self.commit_phase(&mut state)?;
                self.finish(&mut state)
            }
            LifecycleState::Finished => {
                self.log.delete(&self.id)?;
                state.closed = true;
                Ok(())
            }
        }
    }

    fn pending_phase(&self, state: &mut TransactionState) -> MagoResult<()> {
        state.lifecycle = LifecycleState::Pending;
        self.persist(state)?;

        for (name, target) in state.plan.writes() {
            let collection = self.registry.collection(&name)?;
            let id = self.target_id(&target)?;
            let stored = collection.stored_document(&id)?;
            self.capture(state, &collection, id, &stored);

            let attributes = target.attributes();
            if let Some(doc) = &stored {
                if doc.attributes() == attributes {
                    // already written by an earlier run, or nothing to change
                    continue;
                }
            }

            let mut markers = stored.as_ref().map(|doc| doc.in_flight()).unwrap_or_default();
            if !markers.contains(&self.marker) {
                markers.push(self.marker.clone());
            }
            collection.upsert_document(&id, with_markers(target, &markers)?)?;
            if let Some(entity) = state.entities.get(&id) {
                entity.set_in_flight(markers);
            }
        }

        // deletes count as committed once pending; repeating them is harmless
        for (name, id) in state.plan.deletes() {
            let collection = self.registry.collection(&name)?;
            collection.delete(&id)?;
        }

        log::debug!("Transaction {} is pending", self.id);
        Ok(())
    }

    fn commit_phase(&self, state: &mut TransactionState) -> MagoResult<()> {
        state.lifecycle = LifecycleState::Commit;
        self.persist(state)?;

        for (name, target) in state.plan.writes() {
            let collection = self.registry.collection(&name)?;
            let id = self.target_id(&target)?;
            let stored = match collection.stored_document(&id)? {
                Some(doc) => doc,
                None => continue,
            };

            let markers = stored.in_flight();
            if !markers.contains(&self.marker) {
                continue;
            }

            let remaining: Vec<String> = markers.into_iter().filter(|m| m != &self.marker).collect();
            collection.upsert_document(&id, with_markers(stored, &remaining)?)?;
            if let Some(entity) = state.entities.get(&id) {
                entity.set_in_flight(remaining);
            }
        }

        log::debug!("Transaction {} is committed", self.id);
        Ok(())
    }

    fn finish(&self, state: &mut TransactionState) -> MagoResult<()> {
        state.lifecycle = LifecycleState::Finished;
        self.persist(state)?;
        self.log.delete(&self.id)?;
        state.closed = true;
        log::debug!("Transaction {} finished", self.id);
        Ok(())
    }

    fn rollback_phase(&self, state: &mut TransactionState) -> MagoResult<()> {
        // Past pending, recovery only settles markers. Once restores begin the
        // rows may be half undone, so recovery must re-apply every target.
        if matches!(state.lifecycle, LifecycleState::Commit | LifecycleState::Finished) {
            state.lifecycle = LifecycleState::Pending;
            if let Err(e) = self.persist(state) {
                log::error!("Transaction {} could not reopen its record for rollback: {}", self.id, e);
                return Err(e);
            }
        }

        let mut first_error: Option<MagoError> = None;

        for image in state.before_images.iter().rev() {
            if let Err(e) = image.restore() {
                log::error!(
                    "Transaction {} could not restore {} in {}: {}",
                    self.id,
                    image.id,
                    image.collection.name(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        // deletes are not undone; they are applied again
        for (name, id) in state.plan.deletes() {
            let result = self
                .registry
                .collection(&name)
                .and_then(|collection| collection.delete(&id));
            if let Err(e) = result {
                log::error!("Transaction {} could not re-apply delete of {}: {}", self.id, id, e);
                first_error.get_or_insert(e);
            }
        }

        for entity in state.entities.values() {
            let remaining: Vec<String> = entity.in_flight().into_iter().filter(|m| m != &self.marker).collect();
            entity.set_in_flight(remaining);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                self.log.delete(&self.id)?;
                state.closed = true;
                log::debug!("Transaction {} rolled back", self.id);
                Ok(())
            }
        }
    }

    fn capture(&self, state: &mut TransactionState, collection: &EntityCollection, id: EntityId, stored: &Option<Document>) {
        if state.captured.insert((collection.name(), id)) {
            state.before_images.push(BeforeImage {
                collection: collection.clone(),
                id,
                document: stored.clone(),
            });
        }
    }

    fn target_id(&self, target: &Document) -> MagoResult<EntityId> {
        match target.id() {
            Some(id) => Ok(id),
            None => Err(malformed("entry without id")),
        }
    }
}

fn with_markers(document: Document, markers: &[String]) -> MagoResult<Document> {
    let mut document = document;
    document.remove(DOC_IN_FLIGHT);
    if !markers.is_empty() {
        document.put(DOC_IN_FLIGHT, markers.to_vec())?;
    }
    Ok(document)
}
