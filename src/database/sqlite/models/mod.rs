
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// A registered repository whose chunks and index are scoped by `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub source_path: String,
    pub index_status: IndexStatus,
    pub last_indexed_at: Option<NaiveDateTime>,
    pub indexed_vectors: i64,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum IndexStatus {
    Unindexed,
    InProgress,
    Indexed,
    Failed,
}

impl std::fmt::Display for IndexStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            IndexStatus::Unindexed => write!(f, "Unindexed"),
            IndexStatus::InProgress => write!(f, "In progress"),
            IndexStatus::Indexed => write!(f, "Indexed"),
            IndexStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl Project {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_status == IndexStatus::Indexed
    }

    #[inline]
    pub fn is_indexing(&self) -> bool {
        self.index_status == IndexStatus::InProgress
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub id: String,
    pub name: String,
    pub source_path: String,
}

/// Status fields written by an index build; `None` leaves a column unchanged,
/// except `error_message`, which is always written
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectUpdate {
    pub index_status: Option<IndexStatus>,
    pub indexed_vectors: Option<i64>,
    pub last_indexed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
}

/// One stored window of a repository file. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FileChunk {
    pub id: String,
    pub project_id: String,
    pub repo_path: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub generation: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileChunk {
    pub file_path: String,
    pub chunk_index: i64,
    pub chunk_text: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub embedding: Vec<u8>,
    pub dimension: i64,
}

impl ChunkEmbedding {
    #[inline]
    pub fn vector(&self) -> Vec<f32> {
        blob_to_vector(&self.embedding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IndexMapping {
    pub project_id: String,
    pub position: i64,
    pub chunk_id: String,
    pub generation: i64,
}

/// Encode a vector as little-endian `f32` bytes
#[inline]
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes; a trailing partial value is ignored
#[inline]
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|bytes| bytes.try_into().ok())
        .map(f32::from_le_bytes)
        .collect()
}
