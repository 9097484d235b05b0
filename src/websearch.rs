//! Web-search collaborator.
//!
//! The engine treats web search as unreliable: the session layer maps
//! both errors and empty results to "no web fragments" instead of
//! propagating. [`HttpWebSearcher`] talks to a SearxNG-compatible JSON
//! endpoint (`GET <endpoint>?q=...&format=json`); any self-hosted or
//! public instance works.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::WebConfig;

/// One raw web-search result.
#[derive(Debug, Clone)]
pub struct WebHit {
    pub text: String,
    pub source_url: String,
    pub title: String,
}

/// Searches the web for text snippets.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, n: usize) -> Result<Vec<WebHit>>;
}

/// Always returns no hits; used when no endpoint is configured.
pub struct DisabledWebSearcher;

#[async_trait]
impl WebSearch for DisabledWebSearcher {
    async fn search(&self, _query: &str, _n: usize) -> Result<Vec<WebHit>> {
        Ok(Vec::new())
    }
}

/// SearxNG-style JSON search client.
pub struct HttpWebSearcher {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl HttpWebSearcher {
    pub fn new(config: &WebConfig, endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpWebSearcher { client, endpoint })
    }
}

/// Build the searcher named by the configuration: HTTP when an endpoint
/// is set, disabled otherwise.
pub fn create_searcher(config: &WebConfig) -> Result<std::sync::Arc<dyn WebSearch>> {
    match &config.endpoint {
        Some(endpoint) => Ok(std::sync::Arc::new(HttpWebSearcher::new(
            config,
            endpoint.clone(),
        )?)),
        None => Ok(std::sync::Arc::new(DisabledWebSearcher)),
    }
}

#[async_trait]
impl WebSearch for HttpWebSearcher {
    async fn search(&self, query: &str, n: usize) -> Result<Vec<WebHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .with_context(|| "web search request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("web search returned HTTP {}", response.status());
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .with_context(|| "invalid web search response")?;

        Ok(parsed
            .results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .take(n)
            .map(|r| WebHit {
                text: r.content,
                source_url: r.url,
                title: r.title,
            })
            .collect())
    }
}
