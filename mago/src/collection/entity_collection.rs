use crate::collection::{Document, Entity, EntityCursor, EntityId};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::filter::Filter;
use crate::store::StoreCollection;
use std::fmt::Debug;
use std::sync::Arc;

/// Persistence primitives for the entities of one collection.
///
/// # Purpose
/// Sessions and transactions never talk to the store directly; they go
/// through an `EntityCollection`, which maps an [Entity] to its persisted
/// [Document] and back.
///
/// # Operations
/// - `save`: insert, or overwrite if the id is already stored; assigns an id if missing
/// - `sync`: full replace of the stored attributes; the entity must be stored already
/// - `delete`: remove by id; removing an absent id is not an error
/// - `find_by_id`: point lookup
/// - `find`: filtered scan producing an [EntityCursor]
#[derive(Clone)]
pub struct EntityCollection {
    inner: Arc<EntityCollectionInner>,
}

struct EntityCollectionInner {
    name: String,
    store_collection: StoreCollection,
}

impl EntityCollection {
    pub(crate) fn new(name: &str, store_collection: StoreCollection) -> Self {
        EntityCollection {
            inner: Arc::new(EntityCollectionInner {
                name: name.to_string(),
                store_collection,
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    /// Creates a new, unsaved entity holding `attributes`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValidationError`] if `attributes` contains `_id` or `_trans`.
    pub fn create(&self, attributes: Document) -> MagoResult<Entity> {
        if attributes.has_reserved_fields() {
            log::error!("Entity attributes cannot contain reserved fields: {}", attributes);
            return Err(MagoError::new(
                "Entity attributes cannot contain reserved fields",
                ErrorKind::ValidationError,
            ));
        }
        Ok(Entity::new(self.clone(), None, attributes))
    }

    /// Inserts `entity`, or overwrites it if its id is already stored.
    pub fn save(&self, entity: &Entity) -> MagoResult<EntityId> {
        self.check_owner(entity)?;
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = EntityId::new();
                entity.assign_id(id);
                id
            }
        };

        let document = entity.to_document()?;
        self.upsert_document(&id, document)?;
        Ok(id)
    }

    /// Replaces the stored attributes of `entity` with its current ones.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::InvalidOperation`] if the entity has no id.
    /// * [`ErrorKind::NotFound`] if nothing is stored under its id.
    pub fn sync(&self, entity: &Entity) -> MagoResult<()> {
        self.check_owner(entity)?;
        let id = match entity.id() {
            Some(id) => id,
            None => {
                log::error!("Cannot sync an entity that was never saved");
                return Err(MagoError::new(
                    "Cannot sync an entity that was never saved",
                    ErrorKind::InvalidOperation,
                ));
            }
        };

        let document = entity.to_document()?;
        self.inner.store_collection.replace(&id, document)
    }

    /// Removes the entity stored under `id`. An absent id is not an error.
    pub fn delete(&self, id: &EntityId) -> MagoResult<()> {
        self.inner.store_collection.remove(id)?;
        Ok(())
    }

    pub fn find_by_id(&self, id: &EntityId) -> MagoResult<Option<Entity>> {
        match self.inner.store_collection.get(id)? {
            Some(document) => Ok(Some(Entity::from_document(self.clone(), &document)?)),
            None => Ok(None),
        }
    }

    pub fn find(&self, filter: Filter) -> MagoResult<EntityCursor> {
        let documents = self.inner.store_collection.find(&filter)?;
        Ok(EntityCursor::new(self.clone(), documents))
    }

    pub fn size(&self) -> MagoResult<u64> {
        self.inner.store_collection.size()
    }

    /// Returns the raw stored document, reserved fields included.
    pub(crate) fn stored_document(&self, id: &EntityId) -> MagoResult<Option<Document>> {
        self.inner.store_collection.get(id)
    }

    pub(crate) fn stored_documents(&self, filter: &Filter) -> MagoResult<Vec<Document>> {
        self.inner.store_collection.find(filter)
    }

    pub(crate) fn upsert_document(&self, id: &EntityId, document: Document) -> MagoResult<()> {
        if self.inner.store_collection.get(id)?.is_some() {
            self.inner.store_collection.replace(id, document)
        } else {
            self.inner.store_collection.insert(id, document)
        }
    }

    /// Puts the stored state of `id` back to `document`; `None` removes it.
    pub(crate) fn restore_document(&self, id: &EntityId, document: Option<Document>) -> MagoResult<()> {
        match document {
            Some(document) => self.upsert_document(id, document),
            None => self.delete(id),
        }
    }

    fn check_owner(&self, entity: &Entity) -> MagoResult<()> {
        let owner = entity.collection_name();
        if owner != self.inner.name {
            log::error!("Entity of {} cannot be written to {}", owner, self.inner.name);
            return Err(MagoError::new(
                &format!("Entity of {} cannot be written to {}", owner, self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}

impl Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityCollection({})", self.inner.name)
    }
}
