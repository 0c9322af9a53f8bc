use crate::collection::EntityId;
use crate::common::{Value, DOC_ID, DOC_IN_FLIGHT, RESERVED_FIELDS};
use crate::errors::{ErrorKind, MagoError, MagoResult};
use im::OrdMap;
use std::borrow::Cow;
use std::fmt::{Debug, Display};

/// An ordered, flat bag of attribute values.
///
/// A `Document` is both the attribute bag of an [Entity](crate::collection::Entity)
/// and the unit the store persists. In the persisted form two reserved fields are
/// added next to the attributes:
///
/// * `_id` - the [EntityId] of the entity.
/// * `_trans` - the list of transaction ids currently in flight against the entity.
///
/// Keys are kept in sorted order, so two documents with the same content always
/// display and iterate the same way.
///
/// ## Cheap clones
///
/// The data lives in an `im::OrdMap`, so cloning a document shares structure with
/// the original. Sessions clone attribute bags freely when taking snapshots.
#[derive(Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: OrdMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::ValidationError`] if the key is empty.
    /// * [`ErrorKind::ValidationError`] if the key is `_id` and the value is not an id.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut doc = Document::new();
    /// doc.put("name", "Alice")?;
    /// doc.put("age", 30)?;
    /// assert_eq!(doc.size(), 2);
    /// ```
    pub fn put<'a, T: Into<Value>>(&mut self, key: impl Into<Cow<'a, str>>, value: T) -> MagoResult<()> {
        let key = key.into();
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(MagoError::new(
                "Document does not support empty key",
                ErrorKind::ValidationError,
            ));
        }

        let value = value.into();
        if key == DOC_ID && value.as_id().is_none() {
            log::error!("Document id must be an entity id, found {}", value);
            return Err(MagoError::new(
                "Document id must be an entity id",
                ErrorKind::ValidationError,
            ));
        }

        self.data = self.data.update(key.into_owned(), value);
        Ok(())
    }

    /// Returns the value stored under `key`, or `None` if the key is absent.
    ///
    /// An absent key and a key holding [Value::Null] are different things: the
    /// session backs up absence so that rollback can remove an attribute again.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Removes `key` and returns the value it held.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Copies every entry of `other` into this document, overwriting existing keys.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.data.iter() {
            self.data = self.data.update(key.clone(), value.clone());
        }
    }

    /// Returns the entity id stored under `_id`, if any.
    pub fn id(&self) -> Option<EntityId> {
        self.data.get(DOC_ID).and_then(|value| value.as_id().copied())
    }

    /// Returns the transaction ids stored under `_trans`.
    pub(crate) fn in_flight(&self) -> Vec<String> {
        match self.data.get(DOC_IN_FLIGHT) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_string().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns a copy with the reserved fields stripped, i.e. the plain attribute bag.
    pub(crate) fn attributes(&self) -> Document {
        let mut data = self.data.clone();
        for field in RESERVED_FIELDS {
            data.remove(field);
        }
        Document { data }
    }

    /// Returns `true` if the document holds a reserved field.
    pub(crate) fn has_reserved_fields(&self) -> bool {
        RESERVED_FIELDS.iter().any(|field| self.data.contains_key(*field))
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (index, (key, value)) in self.data.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", key, value)?;
        }
        write!(f, "}}")
    }
}

pub fn normalize(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// # Examples
///
/// ```rust
/// use mago::doc;
///
/// let empty = doc!{};
///
/// let person = doc!{
///     name: "Alice",
///     age: 30,
///     tags: ["admin", "user"],
///     address: {
///         city: "Kolkata"
///     }
/// };
/// assert_eq!(person.size(), 4);
/// ```
#[macro_export]
macro_rules! doc {
    ({}) => {
        $crate::collection::Document::new()
    };

    () => {
        $crate::collection::Document::new()
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::doc!($($key : $value),*)
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::collection::Document::new();
            $(
                doc.put($crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
                .expect(&format!("Failed to put value {} in document", stringify!($value)));
            )*
            doc
        }
    };
}

/// Helper macro to convert values for the doc! macro.
#[macro_export]
macro_rules! doc_value {
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
        }
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
