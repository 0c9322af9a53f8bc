use super::backup::{BackupChange, BackupStore, Snapshot};
use super::state::{EntityState, StatePartition};
use crate::collection::{CollectionRegistry, Document, Entity, EntityCollection, EntityId};
use crate::common::Value;
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// A unit of work over entities of any number of collections.
///
/// # Purpose
/// A `Session` tracks the entities added to it, classifies each one as NEW,
/// DIRTY, CLEAN or DELETED, keeps the prior values of every changed attribute,
/// and writes all pending changes in one `commit()`. `rollback()` puts every
/// tracked entity back the way it was at the last commit.
///
/// # Characteristics
/// - **Exact dirty tracking**: an entity is DIRTY only while at least one
///   attribute differs from its last clean value; changing it back makes it CLEAN
/// - **Ordered commit**: NEW entities are saved, then DIRTY ones synced, then
///   DELETED ones removed
/// - **All or nothing**: if any write fails, the writes already made by that
///   commit are undone in the store, the session rolls back and the error is returned
/// - **Durable mode**: `commit_durable()` routes the same changes through a
///   persisted [Transaction] so a crash in the middle can be recovered
///
/// # Usage
/// ```text
/// let session = db.session()?;
/// let user = users.create(doc!{ name: "Alice" })?;
/// session.add(&user)?;                 // NEW
/// session.commit()?;                   // CLEAN, stored
/// user.put("name", "Alicia")?;         // DIRTY
/// session.rollback()?;                 // CLEAN, name is "Alice" again
/// session.close()?;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session resolving collections through `registry`.
    ///
    /// `transaction_collection` names the collection used for the log records
    /// written by [`Session::commit_durable`].
    pub fn new(registry: CollectionRegistry, transaction_collection: &str) -> Self {
        Session {
            inner: Arc::new_cyclic(|self_ref| {
                SessionInner::new(registry, transaction_collection, self_ref.clone())
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Starts tracking `entity`.
    ///
    /// - An entity without an id gets one and becomes NEW.
    /// - A tracked entity in DELETED state becomes NEW again; the pending delete is dropped.
    /// - An untracked entity that already has an id is taken as persisted and becomes CLEAN.
    /// - Adding an entity already tracked in another state does nothing.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidOperation`] if the session is closed, the entity is
    /// tracked by another active session, or a different instance with the same
    /// id is already tracked (use [`Session::merge`] for that).
    pub fn add(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.add(entity)
    }

    /// Adds every entity of `entities`, e.g. the entities of an `EntityCursor`.
    pub fn add_all<I: IntoIterator<Item = Entity>>(&self, entities: I) -> MagoResult<usize> {
        let mut count = 0;
        for entity in entities {
            self.inner.add(&entity)?;
            count += 1;
        }
        Ok(count)
    }

    /// Marks `entity` for removal on the next commit.
    ///
    /// Deleting a NEW entity is the same as expunging it.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotTracked`] if the entity is not tracked by this session.
    pub fn delete(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.delete(entity)
    }

    /// Stops tracking `entity` without touching the store.
    pub fn expunge(&self, entity: &Entity) -> MagoResult<()> {
        self.inner.expunge(entity)
    }

    /// Reconciles `source` with the entity this session tracks under the same id.
    ///
    /// The attributes of `source` replace those of the tracked instance, which
    /// is returned. If nothing is tracked under that id and `load` is `true`,
    /// the persisted version is loaded, tracked, and given the attributes of
    /// `source`; if nothing is persisted either, `source` itself is tracked as
    /// NEW. With `load` set to `false`, an untracked `source` is tracked as CLEAN.
    ///
    /// Merging onto a DELETED instance cancels the delete first.
    pub fn merge(&self, source: &Entity, load: bool) -> MagoResult<Entity> {
        self.inner.merge(source, load)
    }

    /// Writes all pending changes through the collections of the entities.
    pub fn commit(&self) -> MagoResult<()> {
        self.inner.commit()
    }

    /// Writes all pending changes inside a persisted [Transaction].
    ///
    /// If the process dies part way, the transaction log record lets the
    /// recovery scanner finish the batch on the next start.
    ///
    /// On failure the session is rolled back. When the error is
    /// [`ErrorKind::RecoveryRequired`], new entities keep the ids the record
    /// refers to, so adding them again targets the rows recovery will write.
    pub fn commit_durable(&self) -> MagoResult<()> {
        self.inner.commit_durable()
    }

    /// Restores every changed attribute, forgets NEW entities and cancels deletes.
    pub fn rollback(&self) -> MagoResult<()> {
        self.inner.rollback()
    }

    /// Detaches every tracked entity and deactivates the session.
    pub fn close(&self) -> MagoResult<()> {
        self.inner.close()
    }

    /// Sets an attribute of a tracked entity; same as [`Entity::put`].
    pub fn set_attribute<T: Into<Value>>(&self, entity: &Entity, name: &str, value: T) -> MagoResult<()> {
        self.inner.ensure_tracked(entity)?;
        entity.put(name, value)
    }

    /// Removes an attribute of a tracked entity; same as [`Entity::remove`].
    pub fn remove_attribute(&self, entity: &Entity, name: &str) -> MagoResult<Option<Value>> {
        self.inner.ensure_tracked(entity)?;
        entity.remove(name)
    }

    /// Returns the state of `entity` in this session, or `None` if it is not tracked here.
    pub fn state_of(&self, entity: &Entity) -> Option<EntityState> {
        self.inner.state_of(entity)
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.inner.state_of(entity).is_some()
    }

    /// Number of tracked entities in `state`.
    pub fn len(&self, state: EntityState) -> usize {
        self.inner.state.lock().partition.len(state)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().pool.is_empty()
    }

    /// Returns every tracked entity.
    pub fn tracked(&self) -> Vec<Entity> {
        self.inner.state.lock().pool.values().cloned().collect()
    }

    /// Returns the prior values recorded for a DIRTY entity.
    pub fn backup_of(&self, entity: &Entity) -> Option<Snapshot> {
        let id = entity.id()?;
        let state = self.inner.state.lock();
        match state.pool.get(&id) {
            Some(tracked) if tracked.same_as(entity) => state.backup.get(&id).cloned(),
            _ => None,
        }
    }
}

struct SessionState {
    pool: HashMap<EntityId, Entity>,
    partition: StatePartition,
    backup: BackupStore,
    // ids assigned by `add`, forgotten again if the entity never gets committed
    generated: HashSet<EntityId>,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            pool: HashMap::new(),
            partition: StatePartition::new(),
            backup: BackupStore::new(),
            generated: HashSet::new(),
        }
    }

    fn entities(&self, state: EntityState) -> Vec<(EntityId, Entity)> {
        self.partition
            .members(state)
            .into_iter()
            .filter_map(|id| self.pool.get(&id).map(|entity| (id, entity.clone())))
            .collect()
    }
}

// prior stored state of a row written during a commit
type UndoEntry = (EntityCollection, EntityId, Option<Document>);

pub(crate) struct SessionInner {
    id: String,
    active: AtomicBool,
    registry: CollectionRegistry,
    transaction_collection: String,
    self_ref: Weak<SessionInner>,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn new(registry: CollectionRegistry, transaction_collection: &str, self_ref: Weak<SessionInner>) -> Self {
        SessionInner {
            id: Uuid::new_v4().to_string(),
            active: AtomicBool::new(true),
            registry,
            transaction_collection: transaction_collection.to_string(),
            self_ref,
            state: Mutex::new(SessionState::new()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn check_active(&self) -> MagoResult<()> {
        if !self.is_active() {
            log::error!("Session {} is closed", self.id);
            return Err(MagoError::new("Session is closed", ErrorKind::InvalidOperation));
        }
        Ok(())
    }

    fn check_owner(&self, entity: &Entity) -> MagoResult<()> {
        if let Some(owner) = entity.owner() {
            if owner.id() != self.id && owner.is_active() {
                log::error!("Entity {} is tracked by session {}", entity, owner.id());
                return Err(MagoError::new(
                    "Entity is tracked by another session",
                    ErrorKind::InvalidOperation,
                ));
            }
        }
        Ok(())
    }

    fn tracked_id(&self, state: &SessionState, entity: &Entity) -> MagoResult<EntityId> {
        if let Some(id) = entity.id() {
            if let Some(tracked) = state.pool.get(&id) {
                if tracked.same_as(entity) {
                    return Ok(id);
                }
            }
        }

        log::error!("Entity {} is not in session {}", entity, self.id);
        Err(MagoError::new("Entity is not in session", ErrorKind::NotTracked))
    }

    fn ensure_tracked(&self, entity: &Entity) -> MagoResult<()> {
        self.check_active()?;
        let state = self.state.lock();
        self.tracked_id(&state, entity).map(|_| ())
    }

    fn state_of(&self, entity: &Entity) -> Option<EntityState> {
        let state = self.state.lock();
        let id = self.tracked_id(&state, entity).ok()?;
        state.partition.state_of(&id)
    }

    fn track(&self, state: &mut SessionState, id: EntityId, entity: &Entity, entity_state: EntityState) {
        state.pool.insert(id, entity.clone());
        state.partition.assign(id, entity_state);
        entity.attach(&self.id, self.self_ref.clone(), entity_state);
    }

    fn reclassify(&self, state: &mut SessionState, id: EntityId, entity_state: EntityState) {
        state.partition.assign(id, entity_state);
        if let Some(entity) = state.pool.get(&id) {
            entity.set_state(Some(entity_state));
        }
    }

    fn untrack(&self, state: &mut SessionState, id: &EntityId) {
        state.partition.remove(id);
        state.backup.discard(id);
        if let Some(entity) = state.pool.remove(id) {
            entity.detach(&self.id);
            if state.generated.remove(id) {
                entity.clear_id();
            }
        }
    }

    fn add(&self, entity: &Entity) -> MagoResult<()> {
        self.check_active()?;
        self.check_owner(entity)?;
        let mut state = self.state.lock();

        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = EntityId::new();
                entity.assign_id(id);
                state.generated.insert(id);
                self.track(&mut state, id, entity, EntityState::New);
                log::debug!("Session {} added new entity {}", self.id, id);
                return Ok(());
            }
        };

        let tracked = state.pool.get(&id).cloned();
        match tracked {
            Some(tracked) if !tracked.same_as(entity) => {
                log::error!("Another instance of entity {} is already in session {}", id, self.id);
                Err(MagoError::new(
                    "Another instance of this entity is already in session, use merge",
                    ErrorKind::InvalidOperation,
                ))
            }
            Some(_) => {
                if state.partition.state_of(&id) == Some(EntityState::Deleted) {
                    state.backup.discard(&id);
                    self.reclassify(&mut state, id, EntityState::New);
                    log::debug!("Session {} resurrected deleted entity {}", self.id, id);
                }
                Ok(())
            }
            None => {
                self.track(&mut state, id, entity, EntityState::Clean);
                Ok(())
            }
        }
    }

    fn delete(&self, entity: &Entity) -> MagoResult<()> {
        self.check_active()?;
        let mut state = self.state.lock();
        let id = self.tracked_id(&state, entity)?;

        match state.partition.state_of(&id) {
            Some(EntityState::New) => self.untrack(&mut state, &id),
            Some(EntityState::Dirty) => {
                state.backup.park(&id);
                self.reclassify(&mut state, id, EntityState::Deleted);
            }
            Some(EntityState::Clean) => self.reclassify(&mut state, id, EntityState::Deleted),
            Some(EntityState::Deleted) | None => {}
        }
        Ok(())
    }

    fn expunge(&self, entity: &Entity) -> MagoResult<()> {
        self.check_active()?;
        let mut state = self.state.lock();
        let id = self.tracked_id(&state, entity)?;
        self.untrack(&mut state, &id);
        Ok(())
    }

    /// Called by an entity after one of its attributes changed.
    pub(crate) fn register_change(&self, entity: &Entity, attr: &str, old: Option<Value>, new: Option<Value>) {
        if !self.is_active() {
            return;
        }

        let mut state = self.state.lock();
        if let Ok(id) = self.tracked_id(&state, entity) {
            self.record_change(&mut state, id, attr, old, &new);
        }
    }

    fn record_change(&self, state: &mut SessionState, id: EntityId, attr: &str, old: Option<Value>, new: &Option<Value>) {
        match state.partition.state_of(&id) {
            Some(EntityState::Clean) | Some(EntityState::Dirty) => {
                match state.backup.record(id, attr, old, new) {
                    BackupChange::Opened => self.reclassify(state, id, EntityState::Dirty),
                    BackupChange::Closed => self.reclassify(state, id, EntityState::Clean),
                    BackupChange::Kept => {}
                }
            }
            // NEW and DELETED entities are not backed up
            _ => {}
        }
    }

    /// Replaces the attributes of `target` with `attributes`, tracking every difference.
    fn apply(&self, state: &mut SessionState, id: EntityId, target: &Entity, attributes: &Document) -> MagoResult<()> {
        let current = target.attributes();

        for (name, value) in attributes.iter() {
            let old = current.get(name).cloned();
            if old.as_ref() != Some(value) {
                let new = Some(value.clone());
                target.restore(name, new.clone())?;
                self.record_change(state, id, name, old, &new);
            }
        }

        for (name, value) in current.iter() {
            if !attributes.contains_key(name) {
                target.restore(name, None)?;
                self.record_change(state, id, name, Some(value.clone()), &None);
            }
        }
        Ok(())
    }

    fn merge(&self, source: &Entity, load: bool) -> MagoResult<Entity> {
        self.check_active()?;
        let id = match source.id() {
            Some(id) => id,
            None => {
                self.add(source)?;
                return Ok(source.clone());
            }
        };

        let mut state = self.state.lock();
        if let Some(tracked) = state.pool.get(&id).cloned() {
            if state.partition.state_of(&id) == Some(EntityState::Deleted) {
                // merging cancels the delete, changes made before it stay backed up
                let entity_state = if state.backup.unpark(&id) {
                    EntityState::Dirty
                } else {
                    EntityState::Clean
                };
                self.reclassify(&mut state, id, entity_state);
            }
            if !tracked.same_as(source) {
                self.apply(&mut state, id, &tracked, &source.attributes())?;
            }
            return Ok(tracked);
        }

        if load {
            if let Some(persisted) = source.collection().find_by_id(&id)? {
                self.track(&mut state, id, &persisted, EntityState::Clean);
                self.apply(&mut state, id, &persisted, &source.attributes())?;
                return Ok(persisted);
            }

            self.check_owner(source)?;
            self.track(&mut state, id, source, EntityState::New);
            return Ok(source.clone());
        }

        self.check_owner(source)?;
        self.track(&mut state, id, source, EntityState::Clean);
        Ok(source.clone())
    }

    fn commit(&self) -> MagoResult<()> {
        self.check_active()?;
        let mut state = self.state.lock();

        let new = state.entities(EntityState::New);
        let dirty = state.entities(EntityState::Dirty);
        let deleted = state.entities(EntityState::Deleted);
        if new.is_empty() && dirty.is_empty() && deleted.is_empty() {
            log::debug!("Session {} has nothing to commit", self.id);
            return Ok(());
        }

        let mut undo: Vec<UndoEntry> = Vec::new();
        match Self::write_changes(&new, &dirty, &deleted, &mut undo) {
            Ok(()) => {
                self.settle(&mut state, &new, &dirty, &deleted);
                log::debug!(
                    "Session {} committed {} new, {} dirty, {} deleted",
                    self.id,
                    new.len(),
                    dirty.len(),
                    deleted.len()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Session {} commit failed, rolling back: {}", self.id, e);
                self.compensate(undo);
                self.rollback_state(&mut state);
                Err(e)
            }
        }
    }

    fn write_changes(
        new: &[(EntityId, Entity)],
        dirty: &[(EntityId, Entity)],
        deleted: &[(EntityId, Entity)],
        undo: &mut Vec<UndoEntry>,
    ) -> MagoResult<()> {
        for (id, entity) in new {
            let collection = entity.collection();
            undo.push((collection.clone(), *id, collection.stored_document(id)?));
            collection.save(entity)?;
        }

        for (id, entity) in dirty {
            let collection = entity.collection();
            undo.push((collection.clone(), *id, collection.stored_document(id)?));
            collection.sync(entity)?;
        }

        for (id, entity) in deleted {
            let collection = entity.collection();
            undo.push((collection.clone(), *id, collection.stored_document(id)?));
            collection.delete(id)?;
        }
        Ok(())
    }

    /// Puts every row touched by a failed commit back to its prior stored state.
    fn compensate(&self, undo: Vec<UndoEntry>) {
        for (collection, id, prior) in undo.into_iter().rev() {
            if let Err(e) = collection.restore_document(&id, prior) {
                log::error!(
                    "Session {} could not undo write of {} in {}: {}",
                    self.id,
                    id,
                    collection.name(),
                    e
                );
            }
        }
    }

    fn settle(
        &self,
        state: &mut SessionState,
        new: &[(EntityId, Entity)],
        dirty: &[(EntityId, Entity)],
        deleted: &[(EntityId, Entity)],
    ) {
        for (id, _) in new {
            state.generated.remove(id);
            self.reclassify(state, *id, EntityState::Clean);
        }

        for (id, _) in dirty {
            state.backup.discard(id);
            self.reclassify(state, *id, EntityState::Clean);
        }

        for (id, _) in deleted {
            self.untrack(state, id);
        }
    }

    fn commit_durable(&self) -> MagoResult<()> {
        self.check_active()?;
        let mut state = self.state.lock();

        let new = state.entities(EntityState::New);
        let dirty = state.entities(EntityState::Dirty);
        let deleted = state.entities(EntityState::Deleted);
        if new.is_empty() && dirty.is_empty() && deleted.is_empty() {
            log::debug!("Session {} has nothing to commit", self.id);
            return Ok(());
        }

        let log_collection = self.registry.collection(&self.transaction_collection)?;
        let transaction = Transaction::new(log_collection, self.registry.clone());
        transaction.insert_all(new.iter().map(|(_, entity)| entity))?;
        transaction.update_all(dirty.iter().map(|(_, entity)| entity))?;
        transaction.remove_all(deleted.iter().map(|(_, entity)| entity))?;

        match transaction.commit() {
            Ok(()) => {
                self.settle(&mut state, &new, &dirty, &deleted);
                log::debug!(
                    "Session {} committed through transaction {}",
                    self.id,
                    transaction.id()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Session {} durable commit failed, rolling back: {}", self.id, e);
                if e.kind() == &ErrorKind::RecoveryRequired {
                    // the log record still names these ids; recovery inserts under them
                    for (id, _) in new.iter() {
                        state.generated.remove(id);
                    }
                }
                self.rollback_state(&mut state);
                Err(e)
            }
        }
    }

    fn rollback(&self) -> MagoResult<()> {
        self.check_active()?;
        let mut state = self.state.lock();
        self.rollback_state(&mut state);
        Ok(())
    }

    fn rollback_state(&self, state: &mut SessionState) {
        for (id, snapshot) in state.backup.drain() {
            if let Some(entity) = state.pool.get(&id) {
                for (attr, value) in snapshot {
                    // restore writes straight to the entity, so nothing is tracked here
                    if let Err(e) = entity.restore(&attr, value) {
                        log::error!("Could not restore {} of entity {}: {}", attr, id, e);
                    }
                }
            }
        }

        for id in state.partition.members(EntityState::Dirty) {
            self.reclassify(state, id, EntityState::Clean);
        }

        for id in state.partition.members(EntityState::New) {
            self.untrack(state, &id);
        }

        for id in state.partition.members(EntityState::Deleted) {
            self.reclassify(state, id, EntityState::Clean);
        }

        log::debug!("Session {} rolled back", self.id);
    }

    fn close(&self) -> MagoResult<()> {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let mut state = self.state.lock();
        self.release(&mut state);
        log::debug!("Session {} closed", self.id);
        Ok(())
    }

    fn release(&self, state: &mut SessionState) {
        for (_, entity) in state.pool.drain() {
            entity.detach(&self.id);
        }
        state.partition.clear();
        state.backup.clear();
        state.generated.clear();
    }

    #[cfg(test)]
    fn verify(&self) -> MagoResult<()> {
        let state = self.state.lock();
        state.partition.verify()?;
        if state.partition.total() != state.pool.len() {
            return Err(MagoError::new("Pool and partition differ", ErrorKind::InternalError));
        }
        for id in state.pool.keys() {
            let dirty = state.partition.state_of(id) == Some(EntityState::Dirty);
            if dirty != state.backup.contains(id) {
                return Err(MagoError::new("Backup does not match DIRTY set", ErrorKind::InternalError));
            }
        }
        Ok(())
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, entity) in state.pool.drain() {
            entity.detach(&self.id);
        }
    }
}
