//! Research-session orchestration.
//!
//! A [`ResearchSession`] glues the shared [`FragmentStore`] to a
//! request-scoped [`CitationRegistry`]: it runs local and web retrieval,
//! registers each result's source for a stable citation token, and emits
//! the formatted text the agent layer consumes. One session per research
//! request; the registry is never shared across requests.
//!
//! Formatted result shape (byte-for-byte contract):
//!
//! ```text
//! [<token>] <alias> (Relevance: <score to 3 decimals>)
//! <raw fragment text truncated to the configured char budget>
//! ```

use std::sync::Arc;

use tracing::warn;

use crate::citations::{alias_for, CitationEntry, CitationRegistry};
use crate::config::Config;
use crate::error::EngineError;
use crate::models::{FragmentInput, RankedFragment, SourceDescriptor, SourceKind, StoreStats};
use crate::store::FragmentStore;
use crate::websearch::WebSearch;

/// One research request's view of the engine.
pub struct ResearchSession {
    store: Arc<FragmentStore>,
    searcher: Arc<dyn WebSearch>,
    registry: CitationRegistry,
    k: usize,
    relevance_floor: f32,
    snippet_chars: usize,
    web_results: usize,
    batch_size: usize,
}

impl ResearchSession {
    pub fn new(store: Arc<FragmentStore>, searcher: Arc<dyn WebSearch>, config: &Config) -> Self {
        ResearchSession {
            store,
            searcher,
            registry: CitationRegistry::new(),
            k: config.retrieval.default_k,
            relevance_floor: config.retrieval.relevance_floor,
            snippet_chars: config.retrieval.snippet_chars,
            web_results: config.web.results,
            batch_size: config.ingest.batch_size,
        }
    }

    /// Search the indexed local corpus and return cited, formatted text.
    pub async fn search_local(&mut self, query: &str) -> Result<String, EngineError> {
        let ranked = self
            .store
            .search(query, self.k, self.relevance_floor)
            .await?;
        if ranked.is_empty() {
            return Ok("No relevant local documents found.".to_string());
        }
        Ok(self.format_results(&ranked))
    }

    /// Fetch fresh web snippets, fold them into the store, then search.
    ///
    /// The web collaborator is unreliable by contract: an error or an
    /// empty response both mean "no web fragments", never a failure.
    pub async fn search_web(&mut self, query: &str) -> Result<String, EngineError> {
        let hits = match self.searcher.search(query, self.web_results).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "web search failed, continuing without web fragments");
                Vec::new()
            }
        };

        if !hits.is_empty() {
            let inputs: Vec<FragmentInput> = hits
                .into_iter()
                .map(|hit| {
                    let mut source = SourceDescriptor::web(hit.source_url).with_query(query);
                    if !hit.title.is_empty() {
                        source = source.with_title(hit.title);
                    }
                    FragmentInput::new(hit.text, source)
                })
                .collect();
            self.store.ingest(inputs, self.batch_size).await?;
        }

        let ranked = self
            .store
            .search(query, self.k, self.relevance_floor)
            .await?;
        let web_only: Vec<RankedFragment> = ranked
            .into_iter()
            .filter(|r| r.fragment.source.kind == SourceKind::Web)
            .collect();
        if web_only.is_empty() {
            return Ok("No relevant web resources found.".to_string());
        }
        Ok(self.format_results(&web_only))
    }

    /// Remove a source's fragments from the shared store. Returns whether
    /// anything was deleted.
    pub async fn delete_source(&mut self, name: &str) -> Result<bool, EngineError> {
        let removed = self.store.delete_by_source(name).await?;
        Ok(removed > 0)
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        self.store.stats().await
    }

    /// The shared store behind this session, for ingestion-side callers.
    pub fn store(&self) -> &Arc<FragmentStore> {
        &self.store
    }

    /// Sources cited so far, in token order.
    pub fn sources(&self) -> Vec<CitationEntry> {
        self.registry.snapshot()
    }

    /// Render the numbered source list for a report footer.
    pub fn render_source_list(&self) -> String {
        self.registry
            .snapshot()
            .iter()
            .map(|e| format!("{}. {} ({})", e.token, e.alias, e.source.name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Discard all citation state. Only between requests.
    pub fn reset(&mut self) {
        self.registry.reset();
    }

    fn format_results(&mut self, ranked: &[RankedFragment]) -> String {
        ranked
            .iter()
            .map(|r| {
                let token = self.registry.register(&r.fragment.source);
                format_entry(
                    token,
                    &alias_for(&r.fragment.source),
                    r.relevance_score,
                    &r.fragment.text,
                    self.snippet_chars,
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Format one cited result block. Truncation applies to the raw fragment
/// text, never to already-formatted output.
pub fn format_entry(
    token: u32,
    alias: &str,
    relevance_score: f32,
    text: &str,
    snippet_chars: usize,
) -> String {
    let snippet: String = text.chars().take(snippet_chars).collect();
    format!(
        "[{}] {} (Relevance: {:.3})\n{}",
        token, alias, relevance_score, snippet
    )
}
