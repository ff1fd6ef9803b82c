use super::*;
use crate::embeddings::EmbeddingService;
use crate::indexer::IndexBuilder;
use crate::segment::SegmentedChunk;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Embeds text as keyword counts so distances are easy to reason about
struct KeywordService {
    keywords: &'static [&'static str],
}

#[async_trait]
impl EmbeddingService for KeywordService {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("NOEMBED") {
            return Ok(Vec::new());
        }
        let mut vector: Vec<f32> = self
            .keywords
            .iter()
            .map(|keyword| text.matches(keyword).count() as f32)
            .collect();
        vector.push(1.0);
        Ok(vector)
    }

    fn describe(&self) -> String {
        "keywords".to_string()
    }
}

const KEYWORDS: &[&str] = &["alpha", "beta", "gamma"];

struct Fixture {
    _temp_dir: TempDir,
    config: Config,
    database: Database,
    locks: ProjectLocks,
}

impl Fixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let config = Config::with_base_dir(temp_dir.path());
        let database = Database::initialize_from_data_dir(temp_dir.path())
            .await
            .expect("should open database");
        Self {
            _temp_dir: temp_dir,
            config,
            database,
            locks: ProjectLocks::default(),
        }
    }

    fn generator(&self, keywords: &'static [&'static str]) -> EmbeddingGenerator {
        EmbeddingGenerator::new(Arc::new(KeywordService { keywords }), &self.config.embedding)
    }

    fn search(&self) -> SimilaritySearch {
        self.search_with(KEYWORDS)
    }

    fn search_with(&self, keywords: &'static [&'static str]) -> SimilaritySearch {
        SimilaritySearch::new(&self.config, self.database.clone(), self.generator(keywords))
            .with_locks(self.locks.clone())
    }

    async fn index(&self, chunks: &[SegmentedChunk]) {
        IndexBuilder::new(&self.config, self.database.clone(), self.generator(KEYWORDS))
            .with_locks(self.locks.clone())
            .build("demo", Path::new("/repos/demo"), chunks)
            .await
            .expect("build should succeed");
    }
}

fn chunk(file_path: &str, chunk_index: usize, chunk_text: &str) -> SegmentedChunk {
    SegmentedChunk {
        file_path: file_path.to_string(),
        chunk_index,
        chunk_text: chunk_text.to_string(),
    }
}

fn corpus() -> Vec<SegmentedChunk> {
    vec![
        chunk("src/gamma.py", 0, "gamma gamma gamma\n"),
        chunk("src/alpha.rs", 0, "alpha alpha\n"),
        chunk("src/alpha.rs", 1, "beta\n"),
        chunk("lib/mixed.go", 3, "alpha beta\n"),
    ]
}

#[tokio::test]
async fn never_indexed_project_needs_indexing() {
    let fixture = Fixture::new().await;

    let error = fixture
        .search()
        .search("demo", "alpha", 3)
        .await
        .expect_err("no index exists");

    assert!(matches!(error, IndexError::NotFound(_)));
    assert!(error.needs_indexing());
}

#[tokio::test]
async fn results_are_nearest_first_and_bounded() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;

    let matches = fixture
        .search()
        .search("demo", "alpha", 3)
        .await
        .expect("search should succeed");

    assert_eq!(matches.len(), 3);
    let files: Vec<(&str, i64)> = matches
        .iter()
        .map(|m| (m.file_path.as_str(), m.chunk_index))
        .collect();
    assert_eq!(
        files,
        vec![("src/alpha.rs", 0), ("lib/mixed.go", 3), ("src/alpha.rs", 1)]
    );
    let distances: Vec<f32> = matches.iter().map(|m| m.distance).collect();
    assert_eq!(distances, vec![1.0, 1.0, 2.0]);
    assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));

    assert_eq!(matches[0].language, "rust");
    assert_eq!(matches[0].chunk_text, "alpha alpha\n");
    assert_eq!(matches[0].repo_path, "/repos/demo");
    assert_eq!(matches[1].language, "go");
}

#[tokio::test]
async fn top_k_larger_than_index_returns_everything() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;

    let matches = fixture
        .search()
        .search("demo", "gamma gamma gamma", 50)
        .await
        .expect("search should succeed");

    assert_eq!(matches.len(), 4);
    assert_eq!(matches[0].file_path, "src/gamma.py");
    assert_eq!(matches[0].language, "python");
}

#[tokio::test]
async fn zero_top_k_and_empty_queries_return_nothing() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;
    let search = fixture.search();

    assert!(search.search("demo", "alpha", 0).await.expect("ok").is_empty());
    assert!(search.search("demo", "", 3).await.expect("ok").is_empty());
    assert!(search.search("demo", "  \n", 3).await.expect("ok").is_empty());
    assert!(search.search("demo", "NOEMBED", 3).await.expect("ok").is_empty());
}

#[tokio::test]
async fn default_top_k_comes_from_config() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;
    let search = fixture.search();

    assert_eq!(search.default_top_k(), 3);
    let matches = search
        .search_default("demo", "beta")
        .await
        .expect("search should succeed");
    assert_eq!(matches.len(), 3);
}

#[tokio::test]
async fn query_dimension_mismatch_is_a_consistency_error() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;

    let result = fixture
        .search_with(&["alpha"])
        .search("demo", "alpha", 3)
        .await;

    assert!(matches!(result, Err(IndexError::DataConsistency(_))));
}

#[tokio::test]
async fn unresolvable_positions_are_dropped() {
    let fixture = Fixture::new().await;
    fixture.index(&corpus()).await;

    sqlx::query("DELETE FROM index_mappings WHERE project_id = 'demo' AND position = 1")
        .execute(fixture.database.pool())
        .await
        .expect("should delete mapping");

    let matches = fixture
        .search()
        .search("demo", "alpha", 4)
        .await
        .expect("search should succeed");

    assert_eq!(matches.len(), 3);
    assert!(matches.iter().all(|m| m.chunk_text != "alpha alpha\n"));
}

#[tokio::test]
async fn invalid_project_id_is_an_input_error() {
    let fixture = Fixture::new().await;

    let result = fixture.search().search("../etc", "alpha", 3).await;

    assert!(matches!(result, Err(IndexError::Input(_))));
}

#[tokio::test]
async fn empty_chunks_are_stored_but_never_returned() {
    let fixture = Fixture::new().await;
    let mut chunks = corpus();
    chunks.push(chunk("src/empty.rs", 0, ""));
    fixture.index(&chunks).await;

    let stored = ChunkQueries::count_for_project(fixture.database.pool(), "demo")
        .await
        .expect("should count");
    assert_eq!(stored, 5);

    for query in ["alpha", "beta", "gamma gamma gamma", "nothing in common"] {
        let matches = fixture
            .search()
            .search("demo", query, 50)
            .await
            .expect("search should succeed");
        assert_eq!(matches.len(), 4, "{query}");
        assert!(
            matches.iter().all(|m| m.file_path != "src/empty.rs"),
            "{query}"
        );
    }
}
