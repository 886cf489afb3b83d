//! Vector index for a single ingested document: exact cosine search in
//! memory, with a LanceDB copy on disk.

pub mod index;
pub mod schema;
pub mod store;

pub use index::{IndexEntry, VectorIndex};
pub use store::{exists, persist, restore};
