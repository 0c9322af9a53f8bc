use crate::collection::{Document, Entity, EntityCollection};
use std::vec::IntoIter;

/// Iterator over the entities matched by a query.
///
/// Documents are fetched eagerly when the cursor is created and turned into
/// entities one by one. A document that cannot be mapped to an entity is
/// logged and skipped.
pub struct EntityCursor {
    collection: EntityCollection,
    documents: IntoIter<Document>,
}

impl EntityCursor {
    pub(crate) fn new(collection: EntityCollection, documents: Vec<Document>) -> Self {
        EntityCursor {
            collection,
            documents: documents.into_iter(),
        }
    }

    pub fn collection_name(&self) -> String {
        self.collection.name()
    }
}

impl Iterator for EntityCursor {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        for document in self.documents.by_ref() {
            match Entity::from_document(self.collection.clone(), &document) {
                Ok(entity) => return Some(entity),
                Err(e) => {
                    log::warn!("Skipping unreadable document in {}: {}", self.collection.name(), e);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.documents.len()))
    }
}
