use anyhow::Result;
use clap::{Parser, Subcommand};
use repo_index::commands::{
    add_project, check_embedding_service, index_project, init_config, list_projects,
    remove_project, search_project, show_config, show_status, update_config,
};
use repo_index::config::{Config, get_config_dir};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "repo-index")]
#[command(about = "Semantic indexing and similarity search over repository checkouts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialise configuration and check the embedding service
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Check that the embedding service is reachable and serves the model
        #[arg(long)]
        check: bool,
        /// Write the current configuration to config.toml
        #[arg(long)]
        init: bool,
        /// Override a setting and save, e.g. --set embedding.host=gpu-box
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Manage registered repositories
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Segment, embed and (re)build the index for a project
    Index {
        /// Project ID
        project: String,
    },
    /// Find the chunks most similar to a query
    Search {
        /// Project ID
        project: String,
        /// Free-text or code query
        query: String,
        /// Number of matches to return (defaults to search.top_k)
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare index files against stored mappings and chunks
    Status {
        /// Only check this project
        project: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a local repository checkout
    Add {
        /// Project ID, used as the index file name
        id: String,
        /// Path to the repository checkout
        path: PathBuf,
        /// Optional display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered projects and their index status
    List,
    /// Remove a project together with its chunks and index file
    Remove {
        /// Project ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(get_config_dir()?)?;

    match cli.command {
        Commands::Config {
            show,
            check,
            init,
            set,
        } => {
            let writes = init || !set.is_empty();
            if !set.is_empty() {
                update_config(&mut config, &set)?;
            } else if init {
                init_config(&config)?;
            }
            if show || !(check || writes) {
                show_config(&config)?;
            }
            if check {
                check_embedding_service(&config).await?;
            }
        }
        Commands::Project { action } => match action {
            ProjectAction::Add { id, path, name } => {
                add_project(&config, &id, &path, name).await?;
            }
            ProjectAction::List => {
                list_projects(&config).await?;
            }
            ProjectAction::Remove { id } => {
                remove_project(&config, &id).await?;
            }
        },
        Commands::Index { project } => {
            index_project(&config, &project).await?;
        }
        Commands::Search {
            project,
            query,
            top_k,
            json,
        } => {
            search_project(&config, &project, &query, top_k, json).await?;
        }
        Commands::Status { project } => {
            show_status(&config, project.as_deref()).await?;
        }
    }

    Ok(())
}
