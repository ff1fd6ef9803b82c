#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end indexing and search against a repository on disk, using an
// in-process embedding service

use async_trait::async_trait;
use repo_index::config::Config;
use repo_index::database::{Database, IndexStatus, NewProject};
use repo_index::embeddings::{EmbeddingGenerator, EmbeddingService};
use repo_index::indexer::{ConsistencyValidator, IndexBuilder, ProjectLocks};
use repo_index::search::SimilaritySearch;
use repo_index::{IndexError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const KEYWORDS: &[&str] = &["parse", "socket", "cache"];

/// Counts keyword occurrences, plus a constant bias term
#[derive(Default)]
struct KeywordService {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingService for KeywordService {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("UPSTREAM_DOWN") {
            return Err(IndexError::UpstreamService("service unavailable".to_string()));
        }
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|keyword| text.matches(keyword).count() as f32)
            .collect();
        vector.push(1.0);
        Ok(vector)
    }

    fn describe(&self) -> String {
        "keyword counter".to_string()
    }
}

struct TestEnv {
    _temp_dir: TempDir,
    repo: PathBuf,
    config: Config,
    database: Database,
    service: Arc<KeywordService>,
    locks: ProjectLocks,
}

impl TestEnv {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let repo = temp_dir.path().join("repo");
        let mut config = Config::with_base_dir(temp_dir.path().join("data"));
        config.segmenter.max_chunk_size = 4;

        let database = Database::initialize_from_data_dir(config.get_base_dir())
            .await
            .expect("should open database");
        database
            .create_project(NewProject {
                id: "service".to_string(),
                name: "Service".to_string(),
                source_path: repo.to_string_lossy().into_owned(),
            })
            .await
            .expect("should register project");

        write(&repo, "src/parser.rs", "fn parse() {}\n// parse tokens\n");
        write(
            &repo,
            "src/network.rs",
            "fn socket() {}\nfn open_socket() {}\n\n\n// retry socket\n",
        );
        write(&repo, "src/test_parser.py", "parse parse parse\n");
        write(&repo, "README.md", "parse everything\n");
        write(&repo, ".git/HEAD", "ref: refs/heads/main\n");

        Self {
            _temp_dir: temp_dir,
            repo,
            config,
            database,
            service: Arc::new(KeywordService::default()),
            locks: ProjectLocks::default(),
        }
    }

    fn generator(&self) -> EmbeddingGenerator {
        let service: Arc<dyn EmbeddingService> = Arc::clone(&self.service) as _;
        EmbeddingGenerator::new(service, &self.config.embedding)
    }

    fn builder(&self) -> IndexBuilder {
        IndexBuilder::new(&self.config, self.database.clone(), self.generator())
            .with_locks(self.locks.clone())
    }

    fn search(&self) -> SimilaritySearch {
        SimilaritySearch::new(&self.config, self.database.clone(), self.generator())
            .with_locks(self.locks.clone())
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("should create directories");
    }
    std::fs::write(path, contents).expect("should write file");
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[tokio::test]
async fn index_then_search_repository() {
    init_test_tracing();
    let env = TestEnv::new().await;

    let index_path = env
        .builder()
        .build_index("service")
        .await
        .expect("build should succeed");
    assert!(index_path.ends_with("indexes/service.idx"));
    assert!(index_path.exists());

    // network.rs has 5 lines -> 2 chunks of at most 4 lines, parser.rs -> 1 chunk
    assert_eq!(env.service.calls.load(Ordering::SeqCst), 3);

    let matches = env
        .search()
        .search("service", "parse", 1)
        .await
        .expect("search should succeed");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].file_path, "src/parser.rs");
    assert_eq!(matches[0].chunk_index, 0);
    assert_eq!(matches[0].language, "rust");
    assert_eq!(matches[0].repo_path, env.repo.to_string_lossy());

    let socket_matches = env
        .search()
        .search("service", "socket socket", 3)
        .await
        .expect("search should succeed");
    assert_eq!(socket_matches.len(), 3);
    assert_eq!(socket_matches[0].file_path, "src/network.rs");
    assert_eq!(socket_matches[0].chunk_index, 0);
    assert!(
        socket_matches
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance)
    );

    let project = env
        .database
        .get_project("service")
        .await
        .expect("query should succeed")
        .expect("project exists");
    assert_eq!(project.index_status, IndexStatus::Indexed);
    assert_eq!(project.indexed_vectors, 3);
    assert!(project.last_indexed_at.is_some());
}

#[tokio::test]
async fn rebuild_picks_up_changes_and_stays_consistent() {
    let env = TestEnv::new().await;
    let builder = env.builder();
    builder.build_index("service").await.expect("first build");

    write(&env.repo, "src/cache.rs", "struct cache;\n// cache cache\n");
    builder.build_index("service").await.expect("second build");

    let matches = env
        .search()
        .search("service", "cache cache cache", 1)
        .await
        .expect("search should succeed");
    assert_eq!(matches[0].file_path, "src/cache.rs");

    let index_dir = env.config.index_dir();
    let report = ConsistencyValidator::new(&env.database, &index_dir)
        .validate_project("service")
        .await
        .expect("validation should run");
    assert!(report.is_consistent(), "{}", report.summary());
    assert_eq!(report.index_vectors, Some(4));
    assert_eq!(report.mapping_rows, 4);
    assert_eq!(report.chunk_generations.len(), 1);
    assert!(!index_dir.join("service.idx.tmp").exists());
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index_searchable() {
    let env = TestEnv::new().await;
    let builder = env.builder();
    builder.build_index("service").await.expect("first build");
    let index_path = env.config.index_dir().join("service.idx");
    let before = std::fs::read(&index_path).expect("index exists");

    write(&env.repo, "src/broken.rs", "// UPSTREAM_DOWN\n");
    let result = builder.build_index("service").await;
    assert!(matches!(result, Err(IndexError::UpstreamService(_))));

    assert_eq!(std::fs::read(&index_path).expect("index exists"), before);
    let matches = env
        .search()
        .search("service", "parse", 1)
        .await
        .expect("previous index still serves");
    assert_eq!(matches[0].file_path, "src/parser.rs");

    let project = env
        .database
        .get_project("service")
        .await
        .expect("query should succeed")
        .expect("project exists");
    assert_eq!(project.index_status, IndexStatus::Failed);
    assert!(project.error_message.is_some());
}

#[tokio::test]
async fn removed_project_needs_indexing_again() {
    let env = TestEnv::new().await;
    let builder = env.builder();
    builder.build_index("service").await.expect("build");

    assert!(builder.remove_project("service").await.expect("remove"));

    let error = env
        .search()
        .search("service", "parse", 3)
        .await
        .expect_err("index is gone");
    assert!(error.needs_indexing());
    assert!(
        env.database
            .get_project("service")
            .await
            .expect("query should succeed")
            .is_none()
    );
}

#[tokio::test]
async fn concurrent_search_sees_no_partial_index() {
    let env = TestEnv::new().await;
    let builder = env.builder();
    let search = env.search();

    let (built, searched) = tokio::join!(
        builder.build_index("service"),
        search.search("service", "parse", 3)
    );

    built.expect("build should succeed");
    match searched {
        Ok(matches) => assert_eq!(matches.len(), 3),
        Err(e) => assert!(e.needs_indexing(), "unexpected error: {e}"),
    }
}
