// Vector index builder
// Orchestrates segmentation, embedding, metadata storage and the per-project index file

pub mod consistency;
pub mod locks;


use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SegmenterConfig};
use crate::database::sqlite::models::{IndexStatus, NewFileChunk, ProjectUpdate};
use crate::database::sqlite::queries::{ChunkQueries, ProjectQueries};
use crate::database::sqlite::Database;
use crate::database::vector_index::{FlatIndex, is_staging_path, staging_path};
use crate::embeddings::{EmbeddingGenerator, is_sentinel};
use crate::segment::{SegmentedChunk, segment_with_config};
use crate::{IndexError, Result};

pub use consistency::{ConsistencyIssue, ConsistencyReport, ConsistencyValidator};
pub use locks::{ProjectFileLock, ProjectLocks};

const INDEX_FILE_EXTENSION: &str = "idx";
const MAX_PROJECT_ID_LEN: usize = 128;

/// Reject project ids that are empty or unsafe to use as a file name
#[inline]
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        return Err(IndexError::Input("project id cannot be empty".to_string()));
    }

    if project_id.len() > MAX_PROJECT_ID_LEN {
        return Err(IndexError::Input(format!(
            "project id is longer than {MAX_PROJECT_ID_LEN} characters"
        )));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if project_id.starts_with('.') || !project_id.chars().all(allowed) {
        return Err(IndexError::Input(format!(
            "project id '{project_id}' may only contain letters, digits, '-', '_' and '.', \
             and cannot start with '.'"
        )));
    }

    Ok(())
}

/// Where the index file for `project_id` lives under `index_dir`
#[inline]
pub fn index_file_path(index_dir: &Path, project_id: &str) -> Result<PathBuf> {
    validate_project_id(project_id)?;
    Ok(index_dir.join(format!("{project_id}.{INDEX_FILE_EXTENSION}")))
}

/// Result of a successful build, before it is reduced to the index path
#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildOutcome {
    index_path: PathBuf,
    generation: i64,
    chunks_stored: usize,
    vectors_indexed: usize,
}

/// Builds and replaces per-project vector indexes
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    database: Database,
    embeddings: EmbeddingGenerator,
    index_dir: PathBuf,
    segmenter: SegmenterConfig,
    retain_superseded_chunks: bool,
    locks: ProjectLocks,
    cancel: CancellationToken,
}

impl IndexBuilder {
    #[inline]
    pub fn new(config: &Config, database: Database, embeddings: EmbeddingGenerator) -> Self {
        Self {
            database,
            embeddings,
            index_dir: config.index_dir(),
            segmenter: config.segmenter.clone(),
            retain_superseded_chunks: config.index.retain_superseded_chunks,
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
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Segment a registered project's source tree and rebuild its index
    #[inline]
    pub async fn build_index(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;

        let project = self
            .database
            .get_project(project_id)
            .await
            .map_err(IndexError::database)?
            .ok_or_else(|| IndexError::Input(format!("unknown project: {project_id}")))?;

        let source_path = PathBuf::from(&project.source_path);
        if !source_path.is_dir() {
            return Err(IndexError::Input(format!(
                "source path for project {} is not a directory: {}",
                project_id, project.source_path
            )));
        }

        info!(
            "Segmenting {} for project {}",
            source_path.display(),
            project_id
        );
        let segmenter = self.segmenter.clone();
        let walk_root = source_path.clone();
        let chunks =
            tokio::task::spawn_blocking(move || segment_with_config(&walk_root, &segmenter))
                .await
                .map_err(|e| IndexError::Other(anyhow::anyhow!("segmentation task failed: {e}")))?;

        self.build(project_id, &source_path, &chunks).await
    }

    /// Embed `chunks`, persist them, and atomically replace the project's index.
    ///
    /// Holds the project's write lock, in this process and on the lock file,
    /// for the whole run. On failure the previous index file and mappings are
    /// left untouched.
    #[inline]
    pub async fn build(
        &self,
        project_id: &str,
        repo_local_path: &Path,
        chunks: &[SegmentedChunk],
    ) -> Result<PathBuf> {
        let index_path = index_file_path(&self.index_dir, project_id)?;

        let lock = self.locks.lock_for(project_id);
        let _guard = lock.write().await;
        let _file_lock = ProjectFileLock::exclusive(&self.index_dir, project_id).await?;

        let repo_path = repo_local_path.to_string_lossy();
        ProjectQueries::ensure(self.database.pool(), project_id, &repo_path)
            .await
            .map_err(IndexError::database)?;
        self.record_status(
            project_id,
            ProjectUpdate {
                index_status: Some(IndexStatus::InProgress),
                ..ProjectUpdate::default()
            },
        )
        .await;

        let result = self
            .build_locked(project_id, &repo_path, chunks, index_path)
            .await;

        match &result {
            Ok(outcome) => {
                info!(
                    "Indexed project {}: {} vectors from {} chunks (generation {}) at {}",
                    project_id,
                    outcome.vectors_indexed,
                    outcome.chunks_stored,
                    outcome.generation,
                    outcome.index_path.display()
                );
                self.record_status(
                    project_id,
                    ProjectUpdate {
                        index_status: Some(IndexStatus::Indexed),
                        indexed_vectors: i64::try_from(outcome.vectors_indexed).ok(),
                        last_indexed_at: Some(Utc::now().naive_utc()),
                        error_message: None,
                    },
                )
                .await;
            }
            Err(e) => {
                warn!("Indexing project {} failed: {}", project_id, e);
                self.record_status(
                    project_id,
                    ProjectUpdate {
                        index_status: Some(IndexStatus::Failed),
                        error_message: Some(e.to_string()),
                        ..ProjectUpdate::default()
                    },
                )
                .await;
            }
        }

        result.map(|outcome| outcome.index_path)
    }

    /// Delete a project's rows and index file. Returns false if nothing existed.
    #[inline]
    pub async fn remove_project(&self, project_id: &str) -> Result<bool> {
        let index_path = index_file_path(&self.index_dir, project_id)?;

        let lock = self.locks.lock_for(project_id);
        let guard = lock.write().await;
        let file_lock = ProjectFileLock::exclusive(&self.index_dir, project_id).await?;

        let mut doomed = self.staged_files(&index_path).await?;
        doomed.push(index_path);

        let mut removed = false;
        for path in doomed {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let deleted = self
            .database
            .delete_project(project_id)
            .await
            .map_err(IndexError::database)?;

        drop(file_lock);
        drop(guard);
        drop(lock);
        self.locks.evict(project_id);

        info!("Removed project {}", project_id);
        Ok(removed || deleted)
    }

    /// Staging files left next to `index_path` by interrupted builds
    async fn staged_files(&self, index_path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.index_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut staged = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_staging_path(index_path, &path) {
                staged.push(path);
            }
        }
        Ok(staged)
    }

    async fn build_locked(
        &self,
        project_id: &str,
        repo_path: &str,
        chunks: &[SegmentedChunk],
        index_path: PathBuf,
    ) -> Result<BuildOutcome> {
        let bar = progress_spinner();
        bar.set_message(format!("Embedding {} chunks for {}", chunks.len(), project_id));

        let texts: Vec<String> = chunks.iter().map(|c| c.chunk_text.clone()).collect();
        let embedded = self.embeddings.embed(&texts, &self.cancel).await;
        bar.finish_and_clear();
        let vectors = embedded?;

        let Some(dimension) = vectors.first().map(Vec::len) else {
            return Err(IndexError::DataConsistency(
                "no embeddings generated".to_string(),
            ));
        };

        // Every stored embedding declares dimension `dimension`; mismatches are stored as zeros
        let mut consistent = Vec::with_capacity(vectors.len());
        let stored_vectors: Vec<Vec<f32>> = vectors
            .into_iter()
            .zip(chunks)
            .map(|(vector, chunk)| {
                if vector.len() == dimension {
                    consistent.push(true);
                    vector
                } else {
                    warn!(
                        "Embedding dimension mismatch for {} chunk {}: expected {}, got {}",
                        chunk.file_path,
                        chunk.chunk_index,
                        dimension,
                        vector.len()
                    );
                    consistent.push(false);
                    vec![0.0; dimension]
                }
            })
            .collect();

        let new_chunks = chunks
            .iter()
            .map(|chunk| {
                Ok(NewFileChunk {
                    file_path: chunk.file_path.clone(),
                    chunk_index: i64::try_from(chunk.chunk_index).map_err(|_| {
                        IndexError::Input(format!("chunk index too large in {}", chunk.file_path))
                    })?,
                    chunk_text: chunk.chunk_text.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let stored = self
            .database
            .store_chunks(project_id, repo_path, &new_chunks, &stored_vectors)
            .await
            .map_err(IndexError::database)?;

        let generation = u64::try_from(stored.generation)
            .map_err(|_| IndexError::DataConsistency("negative generation".to_string()))?;
        let mut index = FlatIndex::new(dimension)?.with_generation(generation);
        let mut mapped_ids = Vec::new();
        for ((vector, is_consistent), chunk_id) in stored_vectors
            .iter()
            .zip(consistent)
            .zip(&stored.chunk_ids)
        {
            if !is_consistent {
                continue;
            }
            if is_sentinel(vector) {
                debug!("Skipping zero vector for chunk {}", chunk_id);
                continue;
            }
            index.add(vector)?;
            mapped_ids.push(chunk_id.clone());
        }

        if index.is_empty() {
            return Err(IndexError::DataConsistency(
                "no valid embeddings to index".to_string(),
            ));
        }

        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let vectors_indexed = index.len();
        tokio::fs::create_dir_all(&self.index_dir).await?;
        let staged_path = staging_path(&index_path, generation);
        let write_path = staged_path.clone();
        tokio::task::spawn_blocking(move || index.write(&write_path))
            .await
            .map_err(|e| IndexError::Other(anyhow::anyhow!("index write task failed: {e}")))??;

        if let Err(e) = self
            .database
            .replace_mappings(project_id, stored.generation, &mapped_ids)
            .await
        {
            if let Err(cleanup) = tokio::fs::remove_file(&staged_path).await {
                warn!(
                    "Failed to remove staged index {}: {}",
                    staged_path.display(),
                    cleanup
                );
            }
            return Err(IndexError::database(e));
        }

        tokio::fs::rename(&staged_path, &index_path).await?;

        if self.retain_superseded_chunks {
            debug!("Keeping superseded chunks for project {}", project_id);
        } else {
            // The new generation is already live; leftovers are only wasted rows
            if let Err(e) =
                ChunkQueries::prune_superseded(self.database.pool(), project_id, stored.generation)
                    .await
            {
                warn!(
                    "Failed to prune superseded chunks for project {}: {:#}",
                    project_id, e
                );
            }
        }

        Ok(BuildOutcome {
            index_path,
            generation: stored.generation,
            chunks_stored: stored.chunk_ids.len(),
            vectors_indexed,
        })
    }

    async fn record_status(&self, project_id: &str, update: ProjectUpdate) {
        if let Err(e) = self.database.update_project(project_id, &update).await {
            warn!("Failed to record status for project {}: {:#}", project_id, e);
        }
    }
}

fn progress_spinner() -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
