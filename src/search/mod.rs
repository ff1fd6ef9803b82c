// Similarity search over a project's persisted index

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::queries::{ChunkQueries, MappingQueries};
use crate::database::vector_index::{FlatIndex, VectorIndexError};
use crate::embeddings::{EmbeddingGenerator, is_sentinel};
use crate::indexer::{ProjectFileLock, ProjectLocks, index_file_path};
use crate::segment::language_for_path;
use crate::{IndexError, Result};

/// A stored chunk close to the query, with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub chunk_id: String,
    pub repo_path: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    /// Squared Euclidean distance to the query embedding
    pub distance: f32,
    pub language: &'static str,
}

#[derive(Debug, Clone)]
pub struct SimilaritySearch {
    database: Database,
    embeddings: EmbeddingGenerator,
    index_dir: PathBuf,
    default_top_k: usize,
    locks: ProjectLocks,
    cancel: CancellationToken,
}

impl SimilaritySearch {
    #[inline]
    pub fn new(config: &Config, database: Database, embeddings: EmbeddingGenerator) -> Self {
        Self {
            database,
            embeddings,
            index_dir: config.index_dir(),
            default_top_k: config.search.top_k,
            locks: ProjectLocks::global(),
            cancel: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn with_locks(mut self, locks: ProjectLocks) -> Self {
        self.locks = locks;
        self
    }

    #[inline]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Search with the configured `top_k`
    #[inline]
    pub async fn search_default(&self, project_id: &str, query_text: &str) -> Result<Vec<SearchMatch>> {
        self.search(project_id, query_text, self.default_top_k).await
    }

    /// Find up to `top_k` chunks closest to `query_text`, nearest first.
    ///
    /// A project without an index file yields `NotFound`. A query that embeds
    /// to nothing yields no matches. Hits whose mapping or chunk row is gone
    /// are dropped.
    #[inline]
    pub async fn search(
        &self,
        project_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<SearchMatch>> {
        let index_path = index_file_path(&self.index_dir, project_id)?;

        let lock = self.locks.lock_for(project_id);
        let _guard = lock.read().await;
        let _file_lock = ProjectFileLock::shared(&self.index_dir, project_id).await?;

        let index = load_index(project_id, index_path).await?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = self
            .embeddings
            .embed(&[query_text.to_owned()], &self.cancel)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        if is_sentinel(&query) {
            debug!("Query produced no embedding, returning no matches");
            return Ok(Vec::new());
        }

        let neighbors = index.search(&query, top_k)?;
        let generation = i64::try_from(index.generation())
            .map_err(|_| IndexError::DataConsistency("index generation overflow".to_string()))?;

        let pool = self.database.pool();
        let mut matches = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let position = i64::try_from(neighbor.position)
                .map_err(|_| IndexError::DataConsistency("index position overflow".to_string()))?;

            let Some(chunk_id) = MappingQueries::chunk_id_at(pool, project_id, position, generation)
                .await
                .map_err(IndexError::database)?
            else {
                debug!("No mapping for position {} (generation {})", position, generation);
                continue;
            };

            let Some(chunk) = ChunkQueries::get_by_id(pool, &chunk_id)
                .await
                .map_err(IndexError::database)?
            else {
                debug!("Mapped chunk {} no longer exists", chunk_id);
                continue;
            };

            matches.push(SearchMatch {
                language: language_for_path(&chunk.file_path),
                chunk_id: chunk.id,
                repo_path: chunk.repo_path,
                file_path: chunk.file_path,
                chunk_index: chunk.chunk_index,
                chunk_text: chunk.chunk_text,
                distance: neighbor.distance,
            });
        }

        info!(
            "Search in project {} returned {} matches (top_k {})",
            project_id,
            matches.len(),
            top_k
        );
        Ok(matches)
    }
}

async fn load_index(project_id: &str, index_path: PathBuf) -> Result<FlatIndex> {
    let loaded = tokio::task::spawn_blocking(move || FlatIndex::read(&index_path))
        .await
        .map_err(|e| IndexError::Other(anyhow::anyhow!("index read task failed: {e}")))?;

    match loaded {
        Ok(index) => Ok(index),
        Err(VectorIndexError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(IndexError::NotFound(format!(
                "project {project_id} has no index and needs indexing"
            )))
        }
        Err(e) => Err(e.into()),
    }
}
