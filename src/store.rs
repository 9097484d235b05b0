//! The fragment store: deduplicated ingestion and relevance-ranked
//! retrieval over a [`SimilarityIndex`].
//!
//! Search is a two-stage retrieve-then-rerank pipeline:
//!
//! 1. Embed the query and over-fetch `min(2k, 20)` nearest neighbors.
//! 2. Drop candidates below the relevance floor, blend similarity with
//!    keyword overlap and a length factor ([`crate::score`]), stable-sort
//!    descending, truncate to `k`.
//!
//! Concurrency: the index sits behind a `tokio::sync::RwLock`. Every
//! mutation (`ingest`, `rebuild`, `delete_by_source`) takes the write
//! guard, so writers are serialized and `rebuild` is atomic from the
//! outside — a concurrent `search` sees either the pre-rebuild or the
//! post-rebuild collection, never a partially repopulated one.
//!
//! Query results are kept in an explicit bounded cache keyed by
//! `(query, k, relevance_floor)`, evicted by size and age and invalidated
//! by every mutation.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, RetrievalConfig};
use crate::embedding::{EmbedError, Embedder};
use crate::error::EngineError;
use crate::index::{IndexEntry, SimilarityIndex};
use crate::models::{
    Fragment, FragmentInput, IngestReport, RankedFragment, SourceDescriptor, StoreStats,
};
use crate::score;

/// Over-fetch cap for the first retrieval stage.
const MAX_OVERFETCH: usize = 20;

/// Owns the collection and all ingestion/retrieval logic.
pub struct FragmentStore {
    index: tokio::sync::RwLock<Box<dyn SimilarityIndex>>,
    embedder: std::sync::Arc<dyn Embedder>,
    min_fragment_chars: usize,
    cache: QueryCache,
}

impl FragmentStore {
    pub fn new(
        index: Box<dyn SimilarityIndex>,
        embedder: std::sync::Arc<dyn Embedder>,
        ingest: &IngestConfig,
        retrieval: &RetrievalConfig,
    ) -> Self {
        FragmentStore {
            index: tokio::sync::RwLock::new(index),
            embedder,
            min_fragment_chars: ingest.min_fragment_chars,
            cache: QueryCache::new(
                retrieval.cache_capacity,
                Duration::from_secs(retrieval.cache_ttl_secs),
            ),
        }
    }

    /// Ingest a batch of fragment inputs.
    ///
    /// Per-fragment problems (short text, duplicate identity, a rejected
    /// embedding) are logged and counted as skips; they never abort the
    /// batch. Only an unreachable embedding backend aborts, because every
    /// remaining fragment would fail the same way.
    pub async fn ingest(
        &self,
        inputs: Vec<FragmentInput>,
        batch_size: usize,
    ) -> Result<IngestReport, EngineError> {
        let guard = self.index.write().await;
        let report = self.ingest_locked(&**guard, inputs, batch_size).await?;
        drop(guard);
        self.cache.invalidate();
        Ok(report)
    }

    /// Clear the collection, then ingest. The write guard is held across
    /// both steps; if ingestion fails after the clear, the collection is
    /// left empty rather than mixing stale and new data.
    pub async fn rebuild(
        &self,
        inputs: Vec<FragmentInput>,
        batch_size: usize,
    ) -> Result<IngestReport, EngineError> {
        let guard = self.index.write().await;
        guard.clear().await.map_err(backend)?;
        let report = self.ingest_locked(&**guard, inputs, batch_size).await?;
        drop(guard);
        self.cache.invalidate();
        info!(added = report.added, skipped = report.skipped, "collection rebuilt");
        Ok(report)
    }

    async fn ingest_locked(
        &self,
        index: &dyn SimilarityIndex,
        inputs: Vec<FragmentInput>,
        batch_size: usize,
    ) -> Result<IngestReport, EngineError> {
        let batch_size = batch_size.max(1);
        let mut report = IngestReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut staged: Vec<IndexEntry> = Vec::new();

        for input in inputs {
            if input.text.trim().chars().count() < self.min_fragment_chars {
                debug!(source = %input.source.name, "skipping fragment: text too short");
                report.skipped += 1;
                continue;
            }

            let id = input.identity();
            if seen.contains(id.as_str()) {
                report.skipped += 1;
                continue;
            }
            if index.contains(&id).await.map_err(backend)? {
                debug!(id = %id, "skipping fragment: identity already indexed");
                report.skipped += 1;
                continue;
            }

            let vector = match self.embedder.embed(&input.text).await {
                Ok(v) => v,
                Err(EmbedError::Unavailable(msg)) => {
                    return Err(EngineError::EmbeddingUnavailable(msg));
                }
                Err(EmbedError::Failed(msg)) => {
                    warn!(source = %input.source.name, error = %msg, "skipping fragment: embedding rejected");
                    report.skipped += 1;
                    continue;
                }
            };

            let mut metadata = input.source.to_metadata();
            if let Some(idx) = input.sub_index {
                metadata.insert("sub_index".to_string(), idx.to_string());
            }
            metadata.insert("indexed_at".to_string(), Utc::now().to_rfc3339());

            seen.insert(id.as_str().to_string());
            staged.push(IndexEntry {
                id,
                vector,
                text: input.text,
                metadata,
            });

            if staged.len() >= batch_size {
                index
                    .insert(std::mem::take(&mut staged))
                    .await
                    .map_err(backend)?;
            }
        }

        if !staged.is_empty() {
            index.insert(staged).await.map_err(backend)?;
        }

        report.added = seen.len();
        info!(added = report.added, skipped = report.skipped, "ingest complete");
        Ok(report)
    }

    /// Retrieve the `k` most relevant fragments for `query`.
    ///
    /// `relevance_floor` must be in `[0, 1]`; with the default 0.3 no
    /// returned fragment has similarity below 0.7. An empty result is
    /// success, not an error.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        relevance_floor: f32,
    ) -> Result<Vec<RankedFragment>, EngineError> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let cache_key = QueryCache::key(query, k, relevance_floor);
        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(query, "query cache hit");
            return Ok(hit);
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        let guard = self.index.read().await;
        let overfetch = (2 * k).min(MAX_OVERFETCH);
        let neighbors = guard
            .query_nearest(&query_vec, overfetch)
            .await
            .map_err(backend)?;
        drop(guard);

        let mut ranked: Vec<RankedFragment> = neighbors
            .into_iter()
            .filter_map(|n| {
                let similarity = score::similarity_from_distance(n.distance);
                if !score::passes_floor(similarity, relevance_floor) {
                    return None;
                }
                let relevance_score = score::relevance_score(similarity, query, &n.text);
                Some(RankedFragment {
                    fragment: Fragment {
                        id: n.id,
                        source: SourceDescriptor::from_metadata(&n.metadata),
                        ingested_at: parse_indexed_at(&n.metadata),
                        text: n.text,
                    },
                    distance: n.distance,
                    similarity,
                    relevance_score,
                })
            })
            .collect();

        // sort_by is stable: equal scores keep the index's distance-then-
        // insertion ordering.
        ranked.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);

        self.cache.insert(cache_key, ranked.clone());
        Ok(ranked)
    }

    /// Remove every fragment whose primary source field equals
    /// `source_key`. Returns the number removed; zero is a no-op.
    pub async fn delete_by_source(&self, source_key: &str) -> Result<usize, EngineError> {
        let guard = self.index.write().await;
        let removed = guard
            .delete_matching("source_name", source_key)
            .await
            .map_err(backend)?;
        drop(guard);
        self.cache.invalidate();
        if removed > 0 {
            info!(source = source_key, removed, "deleted fragments by source");
        }
        Ok(removed)
    }

    /// Collection overview: totals and per-kind breakdown.
    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        let guard = self.index.read().await;
        let total_count = guard.count().await.map_err(backend)?;
        let all_meta = guard.all_metadata().await.map_err(backend)?;
        drop(guard);

        let mut sources: HashSet<&str> = HashSet::new();
        let mut counts_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for meta in &all_meta {
            if let Some(name) = meta.get("source_name") {
                sources.insert(name);
            }
            let kind = meta
                .get("source_kind")
                .map(String::as_str)
                .unwrap_or(crate::models::UNKNOWN);
            *counts_by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }

        Ok(StoreStats {
            total_count,
            unique_source_count: sources.len(),
            counts_by_kind,
        })
    }

    /// Number of indexed fragments.
    pub async fn count(&self) -> Result<usize, EngineError> {
        let guard = self.index.read().await;
        guard.count().await.map_err(backend)
    }
}

fn backend(e: anyhow::Error) -> EngineError {
    EngineError::BackendUnavailable(e.to_string())
}

fn parse_indexed_at(meta: &BTreeMap<String, String>) -> Option<DateTime<Utc>> {
    meta.get("indexed_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ============ Query cache ============

type CacheKey = (String, usize, u32);

struct CacheSlot {
    key: CacheKey,
    created: Instant,
    results: Vec<RankedFragment>,
}

/// Bounded, time-evicted cache for search results.
///
/// Deliberately owned by the store (no process-wide globals); keys carry
/// every parameter that changes the result set.
struct QueryCache {
    slots: Mutex<VecDeque<CacheSlot>>,
    capacity: usize,
    ttl: Duration,
}

impl QueryCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        QueryCache {
            slots: Mutex::new(VecDeque::new()),
            capacity,
            ttl,
        }
    }

    fn key(query: &str, k: usize, relevance_floor: f32) -> CacheKey {
        (query.to_string(), k, relevance_floor.to_bits())
    }

    fn get(&self, key: &CacheKey) -> Option<Vec<RankedFragment>> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .find(|s| &s.key == key && s.created.elapsed() < self.ttl)
            .map(|s| s.results.clone())
    }

    fn insert(&self, key: CacheKey, results: Vec<RankedFragment>) {
        if self.capacity == 0 {
            return;
        }
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|s| s.key != key && s.created.elapsed() < self.ttl);
        slots.push_back(CacheSlot {
            key,
            created: Instant::now(),
            results,
        });
        while slots.len() > self.capacity {
            slots.pop_front();
        }
    }

    fn invalidate(&self) {
        self.slots.lock().unwrap().clear();
    }
}
