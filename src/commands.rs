use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingProvider, render_config};
use crate::database::sqlite::{Database, NewProject, Project};
use crate::embeddings::EmbeddingGenerator;
use crate::embeddings::ollama::OllamaClient;
use crate::indexer::{ConsistencyReport, ConsistencyValidator, IndexBuilder, validate_project_id};
use crate::search::{SearchMatch, SimilaritySearch};


/// Open the metadata store under the configured data directory
#[inline]
pub async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_data_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

/// Print the effective configuration and where it is read from
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("Configuration file: {}", config.config_file_path().display());
    println!("Database: {}", config.database_path().display());
    println!("Index directory: {}", config.index_dir().display());
    println!();
    print!("{}", render_config(config)?);
    Ok(())
}

/// Write the current configuration to `config.toml`, creating the directory
#[inline]
pub fn init_config(config: &Config) -> Result<PathBuf> {
    config.save()?;
    let path = config.config_file_path();
    println!("Wrote configuration to {}", path.display());
    Ok(path)
}

/// Apply `key=value` overrides and save the result to `config.toml`
#[inline]
pub fn update_config(config: &mut Config, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{assignment}'"))?;
        config.set_value(key.trim(), value.trim())?;
        info!("Set {} = {}", key.trim(), value.trim());
    }
    config.save()?;
    println!("Saved configuration to {}", config.config_file_path().display());
    Ok(())
}

/// Confirm that the configured embedding service answers
#[inline]
pub async fn check_embedding_service(config: &Config) -> Result<()> {
    let embedding = &config.embedding;
    match embedding.provider {
        EmbeddingProvider::Ollama => {
            let client = OllamaClient::new(embedding)?;
            tokio::task::spawn_blocking(move || client.health_check())
                .await
                .context("Health check task failed")??;
        }
        EmbeddingProvider::OpenAi => {
            let generator = EmbeddingGenerator::from_config(embedding)?;
            let probe = generator.service().embed_text("health check").await?;
            if probe.is_empty() {
                anyhow::bail!("embedding service returned an empty vector");
            }
        }
    }

    println!(
        "Embedding service OK: {} at {} (model {})",
        embedding.provider,
        embedding.base_url()?,
        embedding.model
    );
    Ok(())
}

/// Register a repository checkout under `project_id`
#[inline]
pub async fn add_project(
    config: &Config,
    project_id: &str,
    source_path: &Path,
    name: Option<String>,
) -> Result<Project> {
    validate_project_id(project_id)?;

    let source_path = std::fs::canonicalize(source_path)
        .with_context(|| format!("Source path not found: {}", source_path.display()))?;
    if !source_path.is_dir() {
        anyhow::bail!("Source path is not a directory: {}", source_path.display());
    }

    let name = name.unwrap_or_else(|| {
        source_path
            .file_name()
            .map_or_else(|| project_id.to_owned(), |n| n.to_string_lossy().into_owned())
    });

    let database = open_database(config).await?;
    if let Some(existing) = database.get_project(project_id).await? {
        anyhow::bail!(
            "Project {} already exists ({})",
            existing.id,
            existing.source_path
        );
    }

    let project = database
        .create_project(NewProject {
            id: project_id.to_owned(),
            name,
            source_path: source_path.to_string_lossy().into_owned(),
        })
        .await
        .context("Failed to create project")?;

    info!("Registered project {} at {}", project.id, project.source_path);
    println!("Added project {} ({})", project.id, project.name);
    println!("Source: {}", project.source_path);
    Ok(project)
}

#[inline]
pub async fn list_projects(config: &Config) -> Result<Vec<Project>> {
    let database = open_database(config).await?;
    let projects = database
        .list_projects()
        .await
        .context("Failed to list projects")?;

    if projects.is_empty() {
        println!("No projects have been added yet.");
        println!("Use 'repo-index project add <id> <path>' to add one.");
        return Ok(projects);
    }

    println!("Projects ({} total):", projects.len());
    println!();
    for project in &projects {
        println!("{} ({})", project.id, project.name);
        println!("   Source: {}", project.source_path);
        println!("   Status: {}", project.index_status);
        if project.is_indexing() {
            println!("   Indexing started: {}", project.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }
        if project.is_indexed() {
            println!("   Vectors: {}", project.indexed_vectors);
        }
        if let Some(indexed_at) = project.last_indexed_at {
            println!("   Last Indexed: {}", indexed_at.format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(error) = &project.error_message {
            println!("   Error: {}", error);
        }
        println!();
    }

    let indexed = projects.iter().filter(|p| p.is_indexed()).count();
    println!(
        "Summary: {} indexed, {} not indexed",
        indexed,
        projects.len() - indexed
    );
    Ok(projects)
}

/// Delete a project with its chunks, embeddings, mappings and index file
#[inline]
pub async fn remove_project(config: &Config, project_id: &str) -> Result<bool> {
    let database = open_database(config).await?;
    let embeddings = EmbeddingGenerator::from_config(&config.embedding)?;
    let builder = IndexBuilder::new(config, database, embeddings);

    let removed = builder.remove_project(project_id).await?;
    if removed {
        println!("Removed project {}", project_id);
    } else {
        println!("Project {} not found", project_id);
    }
    Ok(removed)
}

/// Rebuild a registered project's index; Ctrl+C cancels the run
#[inline]
pub async fn index_project(config: &Config, project_id: &str) -> Result<PathBuf> {
    let database = open_database(config).await?;
    let embeddings = EmbeddingGenerator::from_config(&config.embedding)?;
    let cancel = CancellationToken::new();
    let builder =
        IndexBuilder::new(config, database, embeddings).with_cancellation(cancel.clone());

    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling index build");
                cancel.cancel();
            }
        }
    });

    let result = builder.build_index(project_id).await;
    interrupt.abort();

    let index_path = result?;
    println!("Indexed project {}: {}", project_id, index_path.display());
    Ok(index_path)
}

/// Run a similarity search and print the matches
#[inline]
pub async fn search_project(
    config: &Config,
    project_id: &str,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<Vec<SearchMatch>> {
    let database = open_database(config).await?;
    let embeddings = EmbeddingGenerator::from_config(&config.embedding)?;
    let search = SimilaritySearch::new(config, database, embeddings);
    let top_k = top_k.unwrap_or_else(|| search.default_top_k());

    let matches = match search.search(project_id, query, top_k).await {
        Ok(matches) => matches,
        Err(e) if e.needs_indexing() => {
            println!("Project {} has not been indexed yet.", project_id);
            println!("Use 'repo-index index {}' first.", project_id);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(matches);
    }

    if matches.is_empty() {
        println!("No matches.");
    }
    for (rank, found) in matches.iter().enumerate() {
        println!(
            "{}. {} [chunk {}] ({}, distance {:.4})",
            rank + 1,
            found.file_path,
            found.chunk_index,
            found.language,
            found.distance
        );
        for line in found.chunk_text.lines().take(5) {
            println!("   | {}", line);
        }
        println!();
    }
    Ok(matches)
}

/// Report index file and metadata agreement for one or all projects
#[inline]
pub async fn show_status(
    config: &Config,
    project_id: Option<&str>,
) -> Result<Vec<ConsistencyReport>> {
    let database = open_database(config).await?;
    let index_dir = config.index_dir();
    let validator = ConsistencyValidator::new(&database, &index_dir);

    let reports = match project_id {
        Some(id) => {
            if database.get_project(id).await?.is_none() {
                anyhow::bail!("Unknown project: {}", id);
            }
            vec![validator.validate_project(id).await?]
        }
        None => validator.validate_all().await?,
    };

    if reports.is_empty() {
        println!("No projects have been added yet.");
    }
    for report in &reports {
        let marker = if report.is_consistent() { "OK" } else { "!!" };
        println!("[{}] {}", marker, report.summary());
        if !report.chunk_generations.is_empty() {
            println!("     Chunk generations: {:?}", report.chunk_generations);
        }
    }
    Ok(reports)
}
