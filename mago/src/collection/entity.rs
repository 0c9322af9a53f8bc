use crate::collection::{Document, EntityCollection, EntityId};
use crate::common::{Value, DOC_ID, DOC_IN_FLIGHT, RESERVED_FIELDS};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use crate::session::{EntityState, SessionInner};
use parking_lot::Mutex;
use std::fmt::{Debug, Display};
use std::sync::{Arc, Weak};

/// A uniquely identified, persistable record with a flat attribute bag.
///
/// # Purpose
/// `Entity` is the unit a [Session](crate::session::Session) tracks and a
/// [Transaction](crate::transaction::Transaction) writes. It carries:
/// - the [EntityCollection] it belongs to,
/// - its [EntityId], absent until the entity is added to a session or saved,
/// - its attributes,
/// - the in-flight marker: ids of transactions not yet finalized against it,
/// - the state tag and a non-owning link to the session tracking it.
///
/// # Characteristics
/// - **Handle semantics**: clones share the same entity; use [`Entity::same_as`]
///   to compare identity
/// - **Observed mutation**: `put` and `remove` report the change to the owning
///   session, which classifies the entity and backs up the prior value
/// - **No ownership cycle**: the session link is a `Weak` reference plus the
///   session id, so a session can be dropped while its entities live on
///
/// # Usage
/// ```text
/// let users = db.collection("users")?;
/// let user = users.create(doc!{ name: "Alice" })?;
/// session.add(&user)?;
/// user.put("name", "Alicia")?;
/// session.commit()?;
/// ```
#[derive(Clone)]
pub struct Entity {
    inner: Arc<Mutex<EntityInner>>,
}

struct EntityInner {
    collection: EntityCollection,
    id: Option<EntityId>,
    attributes: Document,
    in_flight: Vec<String>,
    state: Option<EntityState>,
    session: Option<SessionLink>,
}

#[derive(Clone)]
struct SessionLink {
    session_id: String,
    session: Weak<SessionInner>,
}

impl Entity {
    pub(crate) fn new(collection: EntityCollection, id: Option<EntityId>, attributes: Document) -> Self {
        Entity {
            inner: Arc::new(Mutex::new(EntityInner {
                collection,
                id,
                attributes,
                in_flight: Vec::new(),
                state: None,
                session: None,
            })),
        }
    }

    /// Rebuilds an entity from its persisted form.
    pub(crate) fn from_document(collection: EntityCollection, document: &Document) -> MagoResult<Self> {
        let id = match document.id() {
            Some(id) => id,
            None => {
                log::error!("Stored document in {} has no id: {}", collection.name(), document);
                return Err(MagoError::new(
                    &format!("Stored document in {} has no id", collection.name()),
                    ErrorKind::ObjectMappingError,
                ));
            }
        };

        let entity = Entity::new(collection, Some(id), document.attributes());
        entity.inner.lock().in_flight = document.in_flight();
        Ok(entity)
    }

    pub fn id(&self) -> Option<EntityId> {
        self.inner.lock().id
    }

    pub fn collection_name(&self) -> String {
        self.inner.lock().collection.name()
    }

    pub fn collection(&self) -> EntityCollection {
        self.inner.lock().collection.clone()
    }

    /// Returns the value of `name`, or `None` if the attribute is absent.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.lock().attributes.get(name).cloned()
    }

    /// Sets the attribute `name` to `value`.
    ///
    /// If the entity is tracked by an active session, the session is told about
    /// the change and may move the entity between CLEAN and DIRTY.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ValidationError`] if `name` is empty or reserved.
    pub fn put<T: Into<Value>>(&self, name: &str, value: T) -> MagoResult<()> {
        validate_attribute_name(name)?;
        let value = value.into();

        let (old, session) = {
            let mut inner = self.inner.lock();
            let old = inner.attributes.get(name).cloned();
            inner.attributes.put(name, value.clone())?;
            (old, inner.live_session())
        };

        if let Some(session) = session {
            session.register_change(self, name, old, Some(value));
        }
        Ok(())
    }

    /// Removes the attribute `name`, returning its value.
    ///
    /// Removal is tracked like assignment; the prior value is backed up.
    pub fn remove(&self, name: &str) -> MagoResult<Option<Value>> {
        validate_attribute_name(name)?;

        let (old, session) = {
            let mut inner = self.inner.lock();
            let old = inner.attributes.remove(name);
            (old, inner.live_session())
        };

        if old.is_some() {
            if let Some(session) = session {
                session.register_change(self, name, old.clone(), None);
            }
        }
        Ok(old)
    }

    /// Returns a copy of the attribute bag.
    pub fn attributes(&self) -> Document {
        self.inner.lock().attributes.clone()
    }

    /// Returns the ids of the transactions currently in flight against this entity.
    pub fn in_flight(&self) -> Vec<String> {
        self.inner.lock().in_flight.clone()
    }

    /// Returns the state this entity has in its session, or `None` if untracked.
    pub fn state(&self) -> Option<EntityState> {
        self.inner.lock().state
    }

    /// Returns the id of the session tracking this entity, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session.as_ref().map(|link| link.session_id.clone())
    }

    /// Inserts or overwrites this entity in its collection, assigning an id if needed.
    pub fn save(&self) -> MagoResult<EntityId> {
        self.collection().save(self)
    }

    /// Replaces the stored attributes of this entity with the current ones.
    pub fn sync(&self) -> MagoResult<()> {
        self.collection().sync(self)
    }

    /// Removes this entity from its collection.
    pub fn delete(&self) -> MagoResult<()> {
        match self.id() {
            Some(id) => self.collection().delete(&id),
            None => {
                log::error!("Cannot delete an entity that was never saved");
                Err(MagoError::new(
                    "Cannot delete an entity that was never saved",
                    ErrorKind::InvalidOperation,
                ))
            }
        }
    }

    /// Returns `true` if both handles point to the same entity.
    pub fn same_as(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the persisted form: attributes, `_id` and, if any, `_trans`.
    pub(crate) fn to_document(&self) -> MagoResult<Document> {
        let inner = self.inner.lock();
        let mut document = inner.attributes.clone();
        if let Some(id) = inner.id {
            document.put(DOC_ID, id)?;
        }
        if !inner.in_flight.is_empty() {
            document.put(DOC_IN_FLIGHT, inner.in_flight.clone())?;
        }
        Ok(document)
    }

    pub(crate) fn assign_id(&self, id: EntityId) {
        self.inner.lock().id = Some(id);
    }

    pub(crate) fn clear_id(&self) {
        self.inner.lock().id = None;
    }

    /// Writes an attribute without notifying the session.
    pub(crate) fn restore(&self, name: &str, value: Option<Value>) -> MagoResult<()> {
        let mut inner = self.inner.lock();
        match value {
            Some(value) => inner.attributes.put(name, value),
            None => {
                inner.attributes.remove(name);
                Ok(())
            }
        }
    }

    pub(crate) fn set_in_flight(&self, in_flight: Vec<String>) {
        self.inner.lock().in_flight = in_flight;
    }

    pub(crate) fn set_state(&self, state: Option<EntityState>) {
        self.inner.lock().state = state;
    }

    pub(crate) fn attach(&self, session_id: &str, session: Weak<SessionInner>, state: EntityState) {
        let mut inner = self.inner.lock();
        inner.session = Some(SessionLink {
            session_id: session_id.to_string(),
            session,
        });
        inner.state = Some(state);
    }

    /// Clears the state tag and session link if they belong to `session_id`.
    pub(crate) fn detach(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        let owned = inner
            .session
            .as_ref()
            .map(|link| link.session_id == session_id)
            .unwrap_or(false);
        if owned {
            inner.session = None;
            inner.state = None;
        }
    }

    /// Returns the owning session if it is still alive.
    pub(crate) fn owner(&self) -> Option<Arc<SessionInner>> {
        self.inner.lock().live_session()
    }
}

impl EntityInner {
    fn live_session(&self) -> Option<Arc<SessionInner>> {
        self.session.as_ref().and_then(|link| link.session.upgrade())
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Entity")
            .field("collection", &inner.collection.name())
            .field("id", &inner.id)
            .field("attributes", &inner.attributes)
            .field("in_flight", &inner.in_flight)
            .field("state", &inner.state)
            .finish()
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        match inner.id {
            Some(id) => write!(f, "{}[{}] {}", inner.collection.name(), id, inner.attributes),
            None => write!(f, "{}[unsaved] {}", inner.collection.name(), inner.attributes),
        }
    }
}

pub(crate) fn validate_attribute_name(name: &str) -> MagoResult<()> {
    if name.is_empty() {
        log::error!("Attribute name cannot be empty");
        return Err(MagoError::new(
            "Attribute name cannot be empty",
            ErrorKind::ValidationError,
        ));
    }

    if RESERVED_FIELDS.contains(&name) {
        log::error!("Attribute name {} is reserved", name);
        return Err(MagoError::new(
            &format!("Attribute name {} is reserved", name),
            ErrorKind::ValidationError,
        ));
    }
    Ok(())
}
