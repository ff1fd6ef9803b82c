// Storage: SQLite for chunk metadata, flat index files for vectors

pub mod sqlite;
pub mod vector_index;

pub use sqlite::*;
pub use vector_index::{FlatIndex, Neighbor, VectorIndexError};
