use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};


pub mod models;
pub mod queries;

pub use models::*;
pub use queries::*;

pub type DbPool = Pool<Sqlite>;

/// How long a connection waits for another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Ids and generation assigned to one run's stored chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunks {
    pub generation: i64,
    /// Chunk ids in the order the chunks were given
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open (creating if needed) `metadata.db` inside `data_dir`
    #[inline]
    pub async fn initialize_from_data_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("Failed to create data directory: {}", data_dir.display())
        })?;

        Self::new(data_dir.join("metadata.db")).await
    }

    // Project operations
    #[inline]
    pub async fn create_project(&self, new_project: NewProject) -> Result<Project> {
        ProjectQueries::create(&self.pool, new_project).await
    }

    #[inline]
    pub async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        ProjectQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        ProjectQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn update_project(&self, id: &str, update: &ProjectUpdate) -> Result<Option<Project>> {
        ProjectQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn delete_project(&self, id: &str) -> Result<bool> {
        ProjectQueries::delete(&self.pool, id).await
    }

    /// Insert every chunk and its embedding under a fresh generation, all or nothing
    #[inline]
    pub async fn store_chunks(
        &self,
        project_id: &str,
        repo_path: &str,
        chunks: &[NewFileChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<StoredChunks> {
        anyhow::ensure!(
            chunks.len() == embeddings.len(),
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin chunk transaction")?;

        ProjectQueries::touch(&mut tx, project_id).await?;
        let generation = ChunkQueries::next_generation(&mut tx, project_id).await?;
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let id = ChunkQueries::insert_with_embedding(
                &mut tx, project_id, repo_path, generation, chunk, embedding,
            )
            .await?;
            chunk_ids.push(id);
        }

        tx.commit()
            .await
            .context("Failed to commit chunk transaction")?;

        debug!(
            "Stored {} chunks for project {} as generation {}",
            chunk_ids.len(),
            project_id,
            generation
        );
        Ok(StoredChunks {
            generation,
            chunk_ids,
        })
    }

    /// Swap the project's mappings for `chunk_ids` in a single transaction
    #[inline]
    pub async fn replace_mappings(
        &self,
        project_id: &str,
        generation: i64,
        chunk_ids: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin mapping transaction")?;

        ProjectQueries::touch(&mut tx, project_id).await?;
        MappingQueries::replace(&mut tx, project_id, generation, chunk_ids).await?;

        tx.commit()
            .await
            .context("Failed to commit mapping transaction")?;
        Ok(())
    }
}
