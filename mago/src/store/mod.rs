mod document_store;
pub mod memory;
mod store_collection;

pub use document_store::*;
pub use store_collection::*;
