// Consistency checks between a project's index file and its metadata rows


use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::index_file_path;
use crate::database::sqlite::Database;
use crate::database::sqlite::queries::{ChunkQueries, MappingQueries};
use crate::database::vector_index::FlatIndex;
use crate::{IndexError, Result};

/// A single disagreement between the index file and the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// Mapping rows exist but no index file does
    MissingIndexFile { mapping_rows: usize },
    /// The index file exists but could not be parsed
    UnreadableIndexFile(String),
    /// An index file exists without any mapping rows
    UnmappedIndexFile { index_vectors: usize },
    /// Vector count in the file differs from the number of mapping rows
    CountMismatch {
        index_vectors: usize,
        mapping_rows: usize,
    },
    /// Mapping rows belong to a generation other than the file's
    GenerationMismatch {
        index_generation: u64,
        mapping_generations: Vec<i64>,
    },
}

impl std::fmt::Display for ConsistencyIssue {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIndexFile { mapping_rows } => {
                write!(f, "{mapping_rows} mappings but no index file")
            }
            Self::UnreadableIndexFile(reason) => write!(f, "index file unreadable: {reason}"),
            Self::UnmappedIndexFile { index_vectors } => {
                write!(f, "index file with {index_vectors} vectors has no mappings")
            }
            Self::CountMismatch {
                index_vectors,
                mapping_rows,
            } => write!(
                f,
                "index file has {index_vectors} vectors but there are {mapping_rows} mappings"
            ),
            Self::GenerationMismatch {
                index_generation,
                mapping_generations,
            } => write!(
                f,
                "index file is generation {index_generation} but mappings are {mapping_generations:?}"
            ),
        }
    }
}

/// Per-project comparison of the index file against stored rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub project_id: String,
    pub index_path: PathBuf,
    /// Vectors in the index file, if it exists and parses
    pub index_vectors: Option<usize>,
    pub index_generation: Option<u64>,
    pub mapping_rows: usize,
    pub chunk_rows: usize,
    /// Chunks no mapping points at: zero vectors, dimension mismatches and
    /// retained older generations
    pub unmapped_chunks: usize,
    pub chunk_generations: Vec<i64>,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent() {
            format!(
                "Project {} is consistent: {} vectors, {} mappings, {} chunks ({} unmapped)",
                self.project_id,
                self.index_vectors.unwrap_or(0),
                self.mapping_rows,
                self.chunk_rows,
                self.unmapped_chunks
            )
        } else {
            let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
            format!(
                "Project {}: {} inconsistencies found: {}",
                self.project_id,
                self.issues.len(),
                issues.join("; ")
            )
        }
    }
}

/// Reads a project's index file and metadata and reports disagreements
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    index_dir: &'a Path,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, index_dir: &'a Path) -> Self {
        Self {
            database,
            index_dir,
        }
    }

    #[inline]
    pub async fn validate_project(&self, project_id: &str) -> Result<ConsistencyReport> {
        let index_path = index_file_path(self.index_dir, project_id)?;
        let pool = self.database.pool();

        let mappings = MappingQueries::list_for_project(pool, project_id)
            .await
            .map_err(IndexError::database)?;
        let chunk_rows = ChunkQueries::count_for_project(pool, project_id)
            .await
            .map_err(IndexError::database)?;
        let unmapped_chunks = ChunkQueries::count_unmapped(pool, project_id)
            .await
            .map_err(IndexError::database)?;
        let chunk_generations = ChunkQueries::generations(pool, project_id)
            .await
            .map_err(IndexError::database)?;

        let mut issues = Vec::new();
        let index = if index_path.exists() {
            let read_path = index_path.clone();
            match tokio::task::spawn_blocking(move || FlatIndex::read(&read_path))
                .await
                .map_err(|e| IndexError::Other(anyhow::anyhow!("index read task failed: {e}")))?
            {
                Ok(index) => Some(index),
                Err(e) => {
                    issues.push(ConsistencyIssue::UnreadableIndexFile(e.to_string()));
                    None
                }
            }
        } else {
            if !mappings.is_empty() {
                issues.push(ConsistencyIssue::MissingIndexFile {
                    mapping_rows: mappings.len(),
                });
            }
            None
        };

        if let Some(index) = &index {
            if mappings.is_empty() {
                issues.push(ConsistencyIssue::UnmappedIndexFile {
                    index_vectors: index.len(),
                });
            } else {
                if index.len() != mappings.len() {
                    issues.push(ConsistencyIssue::CountMismatch {
                        index_vectors: index.len(),
                        mapping_rows: mappings.len(),
                    });
                }

                let mut mapping_generations: Vec<i64> =
                    mappings.iter().map(|m| m.generation).collect();
                mapping_generations.sort_unstable();
                mapping_generations.dedup();
                let expected = i64::try_from(index.generation()).ok();
                if mapping_generations.len() != 1 || mapping_generations.first().copied() != expected
                {
                    issues.push(ConsistencyIssue::GenerationMismatch {
                        index_generation: index.generation(),
                        mapping_generations,
                    });
                }
            }
        }

        let report = ConsistencyReport {
            project_id: project_id.to_owned(),
            index_path,
            index_vectors: index.as_ref().map(FlatIndex::len),
            index_generation: index.as_ref().map(FlatIndex::generation),
            mapping_rows: mappings.len(),
            chunk_rows: usize::try_from(chunk_rows).unwrap_or(0),
            unmapped_chunks: usize::try_from(unmapped_chunks).unwrap_or(0),
            chunk_generations,
            issues,
        };

        if report.is_consistent() {
            debug!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }

        Ok(report)
    }

    /// Validate every registered project
    #[inline]
    pub async fn validate_all(&self) -> Result<Vec<ConsistencyReport>> {
        let projects = self
            .database
            .list_projects()
            .await
            .map_err(IndexError::database)?;

        let mut reports = Vec::with_capacity(projects.len());
        for project in &projects {
            reports.push(self.validate_project(&project.id).await?);
        }

        let inconsistent = reports.iter().filter(|r| !r.is_consistent()).count();
        info!(
            "Checked {} projects, {} with inconsistencies",
            reports.len(),
            inconsistent
        );
        Ok(reports)
    }
}
