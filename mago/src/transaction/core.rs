use crate::collection::{Document, EntityCollection, EntityId};
use crate::common::{STATE_COMMIT, STATE_FINISHED, STATE_INITIAL, STATE_PENDING};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use std::fmt::Display;
use std::str::FromStr;

/// Lifecycle of a persisted transaction.
///
/// The states only move forward: `Initial -> Pending -> Commit -> Finished`.
/// A record found in any state but `Finished` after a restart is resumed by
/// [`Transaction::recover`](crate::transaction::Transaction::recover).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Built, nothing written to the entities yet
    Initial,
    /// Log record persisted, entities written and tagged, deletes applied
    Pending,
    /// In-flight tags being removed from the entities
    Commit,
    /// Nothing left to recover; the log record is deleted
    Finished,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initial => STATE_INITIAL,
            LifecycleState::Pending => STATE_PENDING,
            LifecycleState::Commit => STATE_COMMIT,
            LifecycleState::Finished => STATE_FINISHED,
        }
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = MagoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            STATE_INITIAL => Ok(LifecycleState::Initial),
            STATE_PENDING => Ok(LifecycleState::Pending),
            STATE_COMMIT => Ok(LifecycleState::Commit),
            STATE_FINISHED => Ok(LifecycleState::Finished),
            _ => {
                log::error!("Unknown transaction state {}", s);
                Err(MagoError::new(
                    &format!("Unknown transaction state {}", s),
                    ErrorKind::ObjectMappingError,
                ))
            }
        }
    }
}

/// Stored state of one row before the transaction first wrote it.
#[derive(Clone)]
pub(crate) struct BeforeImage {
    pub(crate) collection: EntityCollection,
    pub(crate) id: EntityId,
    pub(crate) document: Option<Document>,
}

impl BeforeImage {
    pub(crate) fn restore(&self) -> MagoResult<()> {
        self.collection.restore_document(&self.id, self.document.clone())
    }
}
