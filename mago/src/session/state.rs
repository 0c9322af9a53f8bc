use crate::collection::EntityId;
use crate::errors::{ErrorKind, MagoError, MagoResult};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::fmt::Display;

/// Lifecycle state of an entity tracked by a [Session](crate::session::Session).
///
/// - `New` - added to the session, not yet persisted.
/// - `Dirty` - persisted, and at least one attribute differs from its last known clean value.
/// - `Clean` - persisted, and no attribute differs from its last known clean value.
/// - `Deleted` - persisted, scheduled for removal on the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    New,
    Dirty,
    Clean,
    Deleted,
}

impl EntityState {
    pub const ALL: [EntityState; 4] = [
        EntityState::New,
        EntityState::Dirty,
        EntityState::Clean,
        EntityState::Deleted,
    ];

    fn slot(&self) -> usize {
        match self {
            EntityState::New => 0,
            EntityState::Dirty => 1,
            EntityState::Clean => 2,
            EntityState::Deleted => 3,
        }
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityState::New => write!(f, "NEW"),
            EntityState::Dirty => write!(f, "DIRTY"),
            EntityState::Clean => write!(f, "CLEAN"),
            EntityState::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Partition of the tracked entity ids into the four [EntityState] sets.
///
/// Every id lives in exactly one set. The reverse index answers "which state is
/// this id in" without scanning, and the per-state sets keep insertion order so
/// a commit writes entities in the order they were classified.
#[derive(Default)]
pub(crate) struct StatePartition {
    members: [IndexSet<EntityId>; 4],
    index: HashMap<EntityId, EntityState>,
}

impl StatePartition {
    pub(crate) fn new() -> Self {
        StatePartition::default()
    }

    pub(crate) fn state_of(&self, id: &EntityId) -> Option<EntityState> {
        self.index.get(id).copied()
    }

    pub(crate) fn contains(&self, id: &EntityId) -> bool {
        self.index.contains_key(id)
    }

    /// Places `id` in `state`, removing it from whatever set held it before.
    pub(crate) fn assign(&mut self, id: EntityId, state: EntityState) {
        if let Some(previous) = self.index.insert(id, state) {
            if previous == state {
                return;
            }
            self.members[previous.slot()].shift_remove(&id);
        }
        self.members[state.slot()].insert(id);
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> Option<EntityState> {
        let previous = self.index.remove(id)?;
        self.members[previous.slot()].shift_remove(id);
        Some(previous)
    }

    pub(crate) fn members(&self, state: EntityState) -> Vec<EntityId> {
        self.members[state.slot()].iter().copied().collect()
    }

    pub(crate) fn len(&self, state: EntityState) -> usize {
        self.members[state.slot()].len()
    }

    pub(crate) fn total(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn clear(&mut self) {
        for set in self.members.iter_mut() {
            set.clear();
        }
        self.index.clear();
    }

    /// Checks that the four sets are pairwise disjoint and exactly cover the index.
    pub(crate) fn verify(&self) -> MagoResult<()> {
        let covered: usize = self.members.iter().map(|set| set.len()).sum();
        if covered != self.index.len() {
            log::error!(
                "State partition covers {} ids but indexes {}",
                covered,
                self.index.len()
            );
            return Err(MagoError::new(
                "State partition is inconsistent",
                ErrorKind::InternalError,
            ));
        }

        for state in EntityState::ALL {
            for id in self.members[state.slot()].iter() {
                if self.index.get(id) != Some(&state) {
                    log::error!("Entity {} is in the {} set but indexed otherwise", id, state);
                    return Err(MagoError::new(
                        "State partition is inconsistent",
                        ErrorKind::InternalError,
                    ));
                }
            }
        }
        Ok(())
    }
}
