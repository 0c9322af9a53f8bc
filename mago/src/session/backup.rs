use crate::collection::EntityId;
use crate::common::Value;
use std::collections::{BTreeMap, HashMap};

/// Prior values of one entity, by attribute name. `None` records that the
/// attribute was absent before the change.
pub type Snapshot = BTreeMap<String, Option<Value>>;

/// What a tracked attribute change did to the backup of its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackupChange {
    /// No backup existed; one was created. The entity has become dirty.
    Opened,
    /// The backup was extended or left as it was.
    Kept,
    /// The last differing attribute returned to its prior value; the backup is gone.
    Closed,
}

/// Pre-change snapshots of the dirty entities of a session.
///
/// The live map holds an entry for an entity exactly while that entity is
/// dirty. When a dirty entity is deleted its snapshot moves to the parked map,
/// so a rollback can still undo the attribute changes made before the delete.
#[derive(Default)]
pub(crate) struct BackupStore {
    live: HashMap<EntityId, Snapshot>,
    parked: HashMap<EntityId, Snapshot>,
}

impl BackupStore {
    pub(crate) fn new() -> Self {
        BackupStore::default()
    }

    /// Records a change of `attr` from `old` to `new` on entity `id`.
    ///
    /// The first prior value of an attribute wins. If the attribute comes back
    /// to that prior value its entry is dropped, and once no entry is left the
    /// whole snapshot is dropped.
    pub(crate) fn record(
        &mut self,
        id: EntityId,
        attr: &str,
        old: Option<Value>,
        new: &Option<Value>,
    ) -> BackupChange {
        match self.live.get_mut(&id) {
            None => {
                if &old == new {
                    return BackupChange::Kept;
                }
                let mut snapshot = Snapshot::new();
                snapshot.insert(attr.to_string(), old);
                self.live.insert(id, snapshot);
                BackupChange::Opened
            }
            Some(snapshot) => {
                match snapshot.get(attr) {
                    Some(original) if original == new => {
                        snapshot.remove(attr);
                    }
                    Some(_) => {}
                    None => {
                        if &old != new {
                            snapshot.insert(attr.to_string(), old);
                        }
                    }
                }

                if snapshot.is_empty() {
                    self.live.remove(&id);
                    BackupChange::Closed
                } else {
                    BackupChange::Kept
                }
            }
        }
    }

    pub(crate) fn contains(&self, id: &EntityId) -> bool {
        self.live.contains_key(id)
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<&Snapshot> {
        self.live.get(id)
    }

    /// Moves the live snapshot of `id` aside, keeping it for a later rollback.
    pub(crate) fn park(&mut self, id: &EntityId) {
        if let Some(snapshot) = self.live.remove(id) {
            self.parked.insert(*id, snapshot);
        }
    }

    /// Moves a parked snapshot of `id` back to the live map.
    pub(crate) fn unpark(&mut self, id: &EntityId) -> bool {
        match self.parked.remove(id) {
            Some(snapshot) => {
                self.live.insert(*id, snapshot);
                true
            }
            None => false,
        }
    }

    /// Forgets every snapshot of `id`, live or parked.
    pub(crate) fn discard(&mut self, id: &EntityId) {
        self.live.remove(id);
        self.parked.remove(id);
    }

    /// Removes and returns every snapshot, live ones first.
    pub(crate) fn drain(&mut self) -> Vec<(EntityId, Snapshot)> {
        let mut snapshots: Vec<(EntityId, Snapshot)> = self.live.drain().collect();
        snapshots.extend(self.parked.drain());
        snapshots
    }

    pub(crate) fn clear(&mut self) {
        self.live.clear();
        self.parked.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty() && self.parked.is_empty()
    }
}
