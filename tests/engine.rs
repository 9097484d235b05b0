//! End-to-end engine tests exercising the store, citation registry, and
//! session together against in-memory and SQLite index backends.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use recall_engine::config::Config;
use recall_engine::embedding::{EmbedError, Embedder, HashEmbedder};
use recall_engine::index::memory::MemoryIndex;
use recall_engine::index::sqlite::SqliteIndex;
use recall_engine::models::{FragmentInput, SourceDescriptor};
use recall_engine::session::ResearchSession;
use recall_engine::store::FragmentStore;
use recall_engine::websearch::{DisabledWebSearcher, WebHit, WebSearch};

/// Embedder with a fixed text-to-vector table, for tests that need
/// exact control over similarity. Unknown texts get an orthogonal axis.
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        let table = entries
            .iter()
            .map(|(text, vector)| (text.to_string(), vector.clone()))
            .collect();
        TableEmbedder { table }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedError::Failed(format!("no vector for '{}'", text)))
    }
}

fn hash_store() -> Arc<FragmentStore> {
    let config = Config::default();
    Arc::new(FragmentStore::new(
        Box::new(MemoryIndex::new()),
        Arc::new(HashEmbedder::new(64)),
        &config.ingest,
        &config.retrieval,
    ))
}

fn store_with(embedder: Arc<dyn Embedder>) -> Arc<FragmentStore> {
    let config = Config::default();
    Arc::new(FragmentStore::new(
        Box::new(MemoryIndex::new()),
        embedder,
        &config.ingest,
        &config.retrieval,
    ))
}

fn local_input(text: &str, name: &str) -> FragmentInput {
    FragmentInput::new(text, SourceDescriptor::local(name))
}

#[tokio::test]
async fn test_ingestion_is_idempotent() {
    let store = hash_store();
    let inputs = vec![
        local_input("the first fragment about memory safety", "a.md"),
        local_input("the second fragment about borrow checking", "a.md"),
    ];

    let first = store.ingest(inputs.clone(), 8).await.unwrap();
    assert_eq!(first.added, 2);
    assert_eq!(first.skipped, 0);

    let second = store.ingest(inputs, 8).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_embedding_skips_only_that_fragment() {
    // "unmapped fragment text" has no vector in the table, so embedding
    // it is rejected; the rest of the batch must still land.
    let embedder = TableEmbedder::new(&[
        ("first mapped fragment text", vec![1.0, 0.0, 0.0, 0.0]),
        ("second mapped fragment text", vec![0.0, 1.0, 0.0, 0.0]),
    ]);
    let store = store_with(Arc::new(embedder));

    let report = store
        .ingest(
            vec![
                local_input("first mapped fragment text", "a.md"),
                local_input("unmapped fragment text here", "a.md"),
                local_input("second mapped fragment text", "b.md"),
            ],
            8,
        )
        .await
        .unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("recall.db");
    let config = Config::default();

    let inputs = vec![
        local_input("durable fragment about database transactions", "db.md"),
        local_input("durable fragment about write ahead logging", "db.md"),
    ];

    {
        let index = SqliteIndex::open(&db_path).await.unwrap();
        let store = FragmentStore::new(
            Box::new(index),
            Arc::new(HashEmbedder::new(64)),
            &config.ingest,
            &config.retrieval,
        );
        let report = store.ingest(inputs.clone(), 8).await.unwrap();
        assert_eq!(report.added, 2);
    }

    // A fresh process over the same file must recognize the identities.
    let index = SqliteIndex::open(&db_path).await.unwrap();
    let store = FragmentStore::new(
        Box::new(index),
        Arc::new(HashEmbedder::new(64)),
        &config.ingest,
        &config.retrieval,
    );
    let report = store.ingest(inputs, 8).await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_relevance_floor_discards_distant_fragments() {
    // Query vector is (1, 0, 0, 0). Near fragment at cosine sim 1.0,
    // far fragment orthogonal at sim 0.0; with floor 0.3 only
    // similarity >= 0.7 survives.
    let embedder = TableEmbedder::new(&[
        ("near fragment text here", vec![1.0, 0.0, 0.0, 0.0]),
        ("far fragment text here", vec![0.0, 1.0, 0.0, 0.0]),
        ("probe", vec![1.0, 0.0, 0.0, 0.0]),
    ]);
    let store = store_with(Arc::new(embedder));
    store
        .ingest(
            vec![
                local_input("near fragment text here", "near.md"),
                local_input("far fragment text here", "far.md"),
            ],
            8,
        )
        .await
        .unwrap();

    let ranked = store.search("probe", 5, 0.3).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].fragment.source.name, "near.md");
    for r in &ranked {
        assert!(r.similarity >= 0.7);
    }
}

#[tokio::test]
async fn test_ranking_is_non_increasing() {
    let store = hash_store();
    let mut inputs = Vec::new();
    for i in 0..6 {
        inputs.push(local_input(
            &format!("rust async runtime notes part {} with shared vocabulary", i),
            &format!("doc{}.md", i),
        ));
    }
    store.ingest(inputs, 8).await.unwrap();

    let ranked = store
        .search("rust async runtime shared vocabulary", 6, 1.0)
        .await
        .unwrap();
    assert!(!ranked.is_empty());
    for pair in ranked.windows(2) {
        assert!(pair[0].relevance_score >= pair[1].relevance_score);
    }
}

#[tokio::test]
async fn test_delete_by_source_is_complete() {
    let store = hash_store();
    store
        .ingest(
            vec![
                local_input("notes about the retrieval pipeline stage one", "notes.pdf"),
                local_input("notes about the retrieval pipeline stage two", "notes.pdf"),
                local_input("unrelated fragment about gardening", "garden.md"),
            ],
            8,
        )
        .await
        .unwrap();

    let removed = store.delete_by_source("notes.pdf").await.unwrap();
    assert_eq!(removed, 2);

    let ranked = store
        .search("retrieval pipeline stage", 10, 1.0)
        .await
        .unwrap();
    assert!(ranked.iter().all(|r| r.fragment.source.name != "notes.pdf"));
}

#[tokio::test]
async fn test_rebuild_is_atomic_under_concurrent_search() {
    let store = hash_store();
    let pre: Vec<FragmentInput> = (0..4)
        .map(|i| local_input(&format!("original corpus entry number {}", i), "old.md"))
        .collect();
    store.ingest(pre, 8).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 4);

    let replacement: Vec<FragmentInput> = (0..7)
        .map(|i| local_input(&format!("replacement corpus entry number {}", i), "new.md"))
        .collect();

    let rebuild_store = store.clone();
    let count_store = store.clone();
    let (rebuild_result, observed) = tokio::join!(
        async move { rebuild_store.rebuild(replacement, 8).await },
        async move { count_store.count().await },
    );
    rebuild_result.unwrap();

    // The concurrent observer sees the old total or the new one, never a
    // torn intermediate.
    let observed = observed.unwrap();
    assert!(observed == 4 || observed == 7, "torn count {}", observed);
    assert_eq!(store.count().await.unwrap(), 7);
}

#[tokio::test]
async fn test_delete_and_reingest_restores_counts() {
    let store = hash_store();
    let a_fragments = vec![
        local_input("alpha document first paragraph of content", "a.md"),
        local_input("alpha document second paragraph of content", "a.md"),
        local_input("alpha document third paragraph of content", "a.md"),
    ];
    let b_fragments = vec![
        local_input("beta document first paragraph of content", "b.md"),
        local_input("beta document second paragraph of content", "b.md"),
    ];

    store.ingest(a_fragments.clone(), 8).await.unwrap();
    store.ingest(b_fragments, 8).await.unwrap();
    assert_eq!(store.stats().await.unwrap().total_count, 5);

    store.delete_by_source("a.md").await.unwrap();
    assert_eq!(store.stats().await.unwrap().total_count, 2);

    let report = store.ingest(a_fragments, 8).await.unwrap();
    assert_eq!(report.added, 3);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_count, 5);
    assert_eq!(stats.unique_source_count, 2);
}

struct CannedSearcher;

#[async_trait]
impl WebSearch for CannedSearcher {
    async fn search(&self, _query: &str, n: usize) -> anyhow::Result<Vec<WebHit>> {
        Ok(vec![WebHit {
            text: "rust error handling conventions explained".to_string(),
            source_url: "https://www.example.org/rust-errors".to_string(),
            title: "Rust error handling".to_string(),
        }]
        .into_iter()
        .take(n)
        .collect())
    }
}

#[tokio::test]
async fn test_session_citations_stable_across_local_and_web() {
    let config = Config::default();
    let store = hash_store();
    store
        .ingest(
            vec![local_input(
                "rust error handling conventions in practice",
                "errors.md",
            )],
            8,
        )
        .await
        .unwrap();

    let mut session = ResearchSession::new(store, Arc::new(CannedSearcher), &config);

    let local = session
        .search_local("rust error handling conventions")
        .await
        .unwrap();
    assert!(local.starts_with("[1] Doc: errors (Relevance: "));

    let web = session
        .search_web("rust error handling conventions")
        .await
        .unwrap();
    assert!(web.contains("[2] Web: example.org (Relevance: "));

    // The local source keeps its token on a repeat search.
    let again = session
        .search_local("rust error handling conventions")
        .await
        .unwrap();
    assert!(again.contains("[1] Doc: errors"));
    assert_eq!(session.sources().len(), 2);
}

#[tokio::test]
async fn test_session_formatted_output_shape() {
    let mut config = Config::default();
    // Shape is under test, not ranking; let everything through.
    config.retrieval.relevance_floor = 1.0;
    let store = hash_store();
    let long_text = format!(
        "extended discussion of connection pooling {}",
        "detail ".repeat(120)
    );
    store
        .ingest(vec![local_input(&long_text, "pooling.md")], 8)
        .await
        .unwrap();

    let mut session = ResearchSession::new(store, Arc::new(DisabledWebSearcher), &config);
    let out = session
        .search_local("connection pooling discussion")
        .await
        .unwrap();

    let (header, body) = out.split_once('\n').unwrap();
    assert!(header.starts_with("[1] Doc: pooling (Relevance: 0."));
    assert!(header.ends_with(")"));
    // Truncated to the configured snippet budget, from the raw text.
    assert_eq!(body.chars().count(), config.retrieval.snippet_chars);
    assert!(long_text.starts_with(body));
}

#[tokio::test]
async fn test_empty_query_returns_no_results() {
    let store = hash_store();
    store
        .ingest(vec![local_input("some indexed fragment text", "x.md")], 8)
        .await
        .unwrap();

    assert!(store.search("", 5, 0.3).await.unwrap().is_empty());
    assert!(store.search("   ", 5, 0.3).await.unwrap().is_empty());
    assert!(store.search("query", 0, 0.3).await.unwrap().is_empty());
}
