mod cursor;
mod document;
mod entity;
mod entity_collection;
mod entity_id;
mod registry;
pub(crate) mod snowflake;

pub use cursor::*;
pub use document::*;
pub use entity::*;
pub use entity_collection::*;
pub use entity_id::*;
pub use registry::*;
