use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::ID_GENERATOR;
use once_cell::sync::Lazy;
use std::fmt::{Debug, Display};

static ID_TOO_LARGE_ERROR: Lazy<MagoError> = Lazy::new(|| {
    MagoError::new(
        &format!("EntityId validation error: id value must be less than 10^19 ({})", 10u64.pow(19)),
        ErrorKind::InvalidId,
    )
});

static ID_TOO_SMALL_ERROR: Lazy<MagoError> = Lazy::new(|| {
    MagoError::new(
        &format!("EntityId validation error: id value must be greater than or equal to 10^18 ({})", 10u64.pow(18)),
        ErrorKind::InvalidId,
    )
});

static MAX_VALUE: Lazy<u64> = Lazy::new(|| 10u64.pow(19));
static MIN_VALUE: Lazy<u64> = Lazy::new(|| 10u64.pow(18));

/// Identifier of a persisted entity.
///
/// An entity without an `EntityId` has never been saved. A session assigns one
/// when the entity is added, and the store keys its documents by it. Values are
/// produced by a time-ordered generator in the range [10^18, 10^19), so ids
/// sort roughly by creation time.
///
/// # Examples
///
/// ```rust,ignore
/// use mago::collection::EntityId;
///
/// let id = EntityId::new();
/// let same = EntityId::create_id(id.id_value())?;
/// assert_eq!(id, same);
/// ```
#[derive(PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EntityId {
    id_value: u64,
}

impl EntityId {
    /// Generates a new unique `EntityId`.
    pub fn new() -> Self {
        EntityId {
            id_value: ID_GENERATOR.get_id(),
        }
    }

    /// Creates an `EntityId` from a specific value.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidId`] if the value is outside [10^18, 10^19).
    pub fn create_id(id_value: u64) -> MagoResult<EntityId> {
        EntityId::valid_id(id_value)?;
        Ok(EntityId { id_value })
    }

    pub fn id_value(&self) -> u64 {
        self.id_value
    }

    pub(crate) fn valid_id(id_value: u64) -> MagoResult<bool> {
        if id_value >= *MAX_VALUE {
            log::error!("Id value is too large");
            return Err(ID_TOO_LARGE_ERROR.clone());
        } else if id_value < *MIN_VALUE {
            log::error!("Id value is too small");
            return Err(ID_TOO_SMALL_ERROR.clone());
        }

        Ok(true)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        EntityId::new()
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityId({})", self.id_value)
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_value)
    }
}
