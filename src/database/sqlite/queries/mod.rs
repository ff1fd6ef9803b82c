
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, name, source_path, index_status, last_indexed_at, \
     indexed_vectors, error_message, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, project_id, repo_path, file_path, chunk_index, chunk_text, generation, created_at";

pub struct ProjectQueries;

impl ProjectQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_project: NewProject) -> Result<Project> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO projects (id, name, source_path, index_status, created_at, updated_at) \
             VALUES (?, ?, ?, 'unindexed', ?, ?)",
        )
        .bind(&new_project.id)
        .bind(&new_project.name)
        .bind(&new_project.source_path)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create project {}", new_project.id))?;

        Self::get_by_id(pool, &new_project.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created project"))
    }

    /// Register `id` with `source_path` unless it already exists
    #[inline]
    pub async fn ensure(pool: &SqlitePool, id: &str, source_path: &str) -> Result<Project> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO projects (id, name, source_path, index_status, created_at, updated_at) \
             VALUES (?, ?, ?, 'unindexed', ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(id)
        .bind(source_path)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to register project {id}"))?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve project {id}"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get project by id")?;

        Ok(project)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list projects")?;

        Ok(projects)
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        update: &ProjectUpdate,
    ) -> Result<Option<Project>> {
        let result = sqlx::query(
            "UPDATE projects SET \
                 index_status = COALESCE(?, index_status), \
                 indexed_vectors = COALESCE(?, indexed_vectors), \
                 last_indexed_at = COALESCE(?, last_indexed_at), \
                 error_message = ?, \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(update.index_status)
        .bind(update.indexed_vectors)
        .bind(update.last_indexed_at)
        .bind(&update.error_message)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update project {id}"))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Self::get_by_id(pool, id).await
    }

    /// Bump `updated_at` inside `conn`'s transaction.
    ///
    /// Used as the first statement of a write transaction so SQLite takes the
    /// write lock up front and waits on `busy_timeout` instead of failing a
    /// later read-to-write upgrade with `SQLITE_BUSY`.
    #[inline]
    pub async fn touch(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().naive_utc())
            .bind(id)
            .execute(conn)
            .await
            .with_context(|| format!("Failed to touch project {id}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a project; chunks, embeddings and mappings cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to delete project {id}"))?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// One past the highest generation ever stored for the project
    #[inline]
    pub async fn next_generation(conn: &mut SqliteConnection, project_id: &str) -> Result<i64> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(generation) FROM file_chunks WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(conn)
                .await
                .context("Failed to read current generation")?;

        Ok(current.unwrap_or(0) + 1)
    }

    /// Insert a chunk together with its embedding, returning the new chunk id
    #[inline]
    pub async fn insert_with_embedding(
        conn: &mut SqliteConnection,
        project_id: &str,
        repo_path: &str,
        generation: i64,
        chunk: &NewFileChunk,
        embedding: &[f32],
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO file_chunks \
                 (id, project_id, repo_path, file_path, chunk_index, chunk_text, generation, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(repo_path)
        .bind(&chunk.file_path)
        .bind(chunk.chunk_index)
        .bind(&chunk.chunk_text)
        .bind(generation)
        .bind(Utc::now().naive_utc())
        .execute(&mut *conn)
        .await
        .with_context(|| {
            format!(
                "Failed to insert chunk {} of {}",
                chunk.chunk_index, chunk.file_path
            )
        })?;

        let dimension = i64::try_from(embedding.len()).context("Embedding too large")?;
        sqlx::query("INSERT INTO chunk_embeddings (chunk_id, embedding, dimension) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(vector_to_blob(embedding))
            .bind(dimension)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert embedding for chunk {id}"))?;

        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<FileChunk>> {
        let chunk = sqlx::query_as::<_, FileChunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM file_chunks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chunk by id")?;

        Ok(chunk)
    }

    #[inline]
    pub async fn list_for_generation(
        pool: &SqlitePool,
        project_id: &str,
        generation: i64,
    ) -> Result<Vec<FileChunk>> {
        let chunks = sqlx::query_as::<_, FileChunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM file_chunks \
             WHERE project_id = ? AND generation = ? ORDER BY file_path, chunk_index"
        ))
        .bind(project_id)
        .bind(generation)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks")?;

        Ok(chunks)
    }

    #[inline]
    pub async fn count_for_project(pool: &SqlitePool, project_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM file_chunks WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        Ok(count)
    }

    /// Distinct generations with stored chunks, ascending
    #[inline]
    pub async fn generations(pool: &SqlitePool, project_id: &str) -> Result<Vec<i64>> {
        let generations = sqlx::query_scalar(
            "SELECT DISTINCT generation FROM file_chunks WHERE project_id = ? ORDER BY generation",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunk generations")?;

        Ok(generations)
    }

    /// Chunks of the project that no mapping row points at
    #[inline]
    pub async fn count_unmapped(pool: &SqlitePool, project_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_chunks c \
             WHERE c.project_id = ? \
               AND NOT EXISTS (SELECT 1 FROM index_mappings m WHERE m.chunk_id = c.id)",
        )
        .bind(project_id)
        .fetch_one(pool)
        .await
        .context("Failed to count unmapped chunks")?;

        Ok(count)
    }

    /// Delete chunk rows (and their embeddings) older than `keep_generation`
    #[inline]
    pub async fn prune_superseded(
        pool: &SqlitePool,
        project_id: &str,
        keep_generation: i64,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_chunks WHERE project_id = ? AND generation < ?")
            .bind(project_id)
            .bind(keep_generation)
            .execute(pool)
            .await
            .context("Failed to prune superseded chunks")?;

        debug!(
            "Pruned {} superseded chunks for project {}",
            result.rows_affected(),
            project_id
        );
        Ok(result.rows_affected())
    }
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool, chunk_id: &str) -> Result<Option<ChunkEmbedding>> {
        let embedding = sqlx::query_as::<_, ChunkEmbedding>(
            "SELECT chunk_id, embedding, dimension FROM chunk_embeddings WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chunk embedding")?;

        Ok(embedding)
    }

    /// Distinct declared dimensions among one generation's embeddings
    #[inline]
    pub async fn dimensions_for_generation(
        pool: &SqlitePool,
        project_id: &str,
        generation: i64,
    ) -> Result<Vec<i64>> {
        let dimensions = sqlx::query_scalar(
            "SELECT DISTINCT e.dimension FROM chunk_embeddings e \
             JOIN file_chunks c ON c.id = e.chunk_id \
             WHERE c.project_id = ? AND c.generation = ? ORDER BY e.dimension",
        )
        .bind(project_id)
        .bind(generation)
        .fetch_all(pool)
        .await
        .context("Failed to list embedding dimensions")?;

        Ok(dimensions)
    }
}

pub struct MappingQueries;

impl MappingQueries {
    /// Replace every mapping of the project with `chunk_ids` at positions `0..n`
    #[inline]
    pub async fn replace(
        conn: &mut SqliteConnection,
        project_id: &str,
        generation: i64,
        chunk_ids: &[String],
    ) -> Result<()> {
        sqlx::query("DELETE FROM index_mappings WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete previous mappings")?;

        for (position, chunk_id) in chunk_ids.iter().enumerate() {
            let position = i64::try_from(position).context("Index position overflow")?;
            sqlx::query(
                "INSERT INTO index_mappings (project_id, position, chunk_id, generation) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(project_id)
            .bind(position)
            .bind(chunk_id)
            .bind(generation)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert mapping at position {position}"))?;
        }

        debug!(
            "Mapped {} positions for project {} (generation {})",
            chunk_ids.len(),
            project_id,
            generation
        );
        Ok(())
    }

    /// Chunk id stored at `position` for the given index generation
    #[inline]
    pub async fn chunk_id_at(
        pool: &SqlitePool,
        project_id: &str,
        position: i64,
        generation: i64,
    ) -> Result<Option<String>> {
        let chunk_id = sqlx::query_scalar(
            "SELECT chunk_id FROM index_mappings \
             WHERE project_id = ? AND position = ? AND generation = ?",
        )
        .bind(project_id)
        .bind(position)
        .bind(generation)
        .fetch_optional(pool)
        .await
        .context("Failed to resolve index mapping")?;

        Ok(chunk_id)
    }

    #[inline]
    pub async fn list_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<IndexMapping>> {
        let mappings = sqlx::query_as::<_, IndexMapping>(
            "SELECT project_id, position, chunk_id, generation FROM index_mappings \
             WHERE project_id = ? ORDER BY position",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list mappings")?;

        Ok(mappings)
    }

    #[inline]
    pub async fn count_for_project(pool: &SqlitePool, project_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM index_mappings WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await
            .context("Failed to count mappings")?;

        Ok(count)
    }
}
