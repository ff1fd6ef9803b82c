use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// The caller supplied an unknown or malformed project, path or parameter
    #[error("Invalid input: {0}")]
    Input(String),

    /// The embedding service failed outright for a batch
    #[error("Embedding service error: {0}")]
    UpstreamService(String),

    /// Nothing indexable survived, or stored data disagrees with itself
    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    /// The project has no persisted index and needs indexing first
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl IndexError {
    /// True when the caller can recover by (re)indexing the project.
    #[inline]
    pub fn needs_indexing(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Wrap a failure from the metadata store, keeping its context chain
    #[inline]
    pub fn database(err: anyhow::Error) -> Self {
        Self::Database(format!("{err:#}"))
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod search;
pub mod segment;
