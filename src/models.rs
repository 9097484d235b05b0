//! Core data types that flow through the ingestion and retrieval pipeline.
//!
//! A [`FragmentInput`] is what collaborators (the document loader, the web
//! searcher) hand to the store. The store derives a deterministic
//! [`FragmentId`] from it, embeds the text once, and keeps a [`Fragment`]
//! in the similarity index. Searches return [`RankedFragment`]s carrying
//! the blended relevance score.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata value used when a source field was never recorded.
pub const UNKNOWN: &str = "unknown";

/// Where a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Excerpt of a local file (markdown, text, ...).
    Local,
    /// Snippet returned by a web search.
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Web => "web",
        }
    }

    /// Parse a stored kind string; anything unrecognized reads as `Web`
    /// so stale index rows still render a usable alias.
    pub fn parse(s: &str) -> SourceKind {
        match s {
            "local" => SourceKind::Local,
            _ => SourceKind::Web,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes the origin of a fragment.
///
/// `name` is the primary source key: the filename for local sources, the
/// URL for web sources. Deduplication and `delete_by_source` both match
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub name: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub query: Option<String>,
}

impl SourceDescriptor {
    /// Descriptor for an excerpt of a local file.
    pub fn local(name: impl Into<String>) -> Self {
        SourceDescriptor {
            kind: SourceKind::Local,
            name: name.into(),
            url: None,
            title: None,
            query: None,
        }
    }

    /// Descriptor for a web-search snippet. The URL doubles as the
    /// primary source key.
    pub fn web(url: impl Into<String>) -> Self {
        let url = url.into();
        SourceDescriptor {
            kind: SourceKind::Web,
            name: url.clone(),
            url: Some(url),
            title: None,
            query: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// The field dedup and deletion key on.
    pub fn primary_key(&self) -> &str {
        &self.name
    }

    /// Flatten into the string map stored as index metadata.
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert("source_kind".to_string(), self.kind.to_string());
        meta.insert("source_name".to_string(), self.name.clone());
        if let Some(url) = &self.url {
            meta.insert("source_url".to_string(), url.clone());
        }
        if let Some(title) = &self.title {
            meta.insert("source_title".to_string(), title.clone());
        }
        if let Some(query) = &self.query {
            meta.insert("source_query".to_string(), query.clone());
        }
        meta
    }

    /// Rebuild a descriptor from stored index metadata. Absent fields
    /// default to [`UNKNOWN`] so old rows never fail to parse.
    pub fn from_metadata(meta: &BTreeMap<String, String>) -> Self {
        let kind = meta
            .get("source_kind")
            .map(|s| SourceKind::parse(s))
            .unwrap_or(SourceKind::Local);
        SourceDescriptor {
            kind,
            name: meta
                .get("source_name")
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            url: meta.get("source_url").cloned(),
            title: meta.get("source_title").cloned(),
            query: meta.get("source_query").cloned(),
        }
    }
}

/// Deterministic dedup key for a fragment.
///
/// Full-width SHA-256 over the fragment text, its primary source key, and
/// the optional sub-index. Stable across process restarts; two inputs with
/// identical text and identical primary source always collapse to the same
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn compute(text: &str, primary_key: &str, sub_index: Option<u32>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(primary_key.as_bytes());
        if let Some(idx) = sub_index {
            hasher.update([0x1f]);
            hasher.update(idx.to_le_bytes());
        }
        FragmentId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FragmentId {
    fn from(s: String) -> Self {
        FragmentId(s)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw unit of text handed to the store by a collaborator.
#[derive(Debug, Clone)]
pub struct FragmentInput {
    pub text: String,
    pub source: SourceDescriptor,
    /// Position within the originating document (chunk index), if any.
    pub sub_index: Option<u32>,
}

impl FragmentInput {
    pub fn new(text: impl Into<String>, source: SourceDescriptor) -> Self {
        FragmentInput {
            text: text.into(),
            source,
            sub_index: None,
        }
    }

    pub fn with_sub_index(mut self, idx: u32) -> Self {
        self.sub_index = Some(idx);
        self
    }

    pub fn identity(&self) -> FragmentId {
        FragmentId::compute(&self.text, self.source.primary_key(), self.sub_index)
    }
}

/// Indexed unit of retrievable text.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub text: String,
    pub source: SourceDescriptor,
    /// Timestamp of first successful ingestion; immutable afterward.
    pub ingested_at: Option<DateTime<Utc>>,
}

/// A fragment returned from search, with its scoring breakdown.
#[derive(Debug, Clone)]
pub struct RankedFragment {
    pub fragment: Fragment,
    /// Raw distance reported by the similarity index.
    pub distance: f32,
    /// `1 - distance`.
    pub similarity: f32,
    /// Blended score: similarity × keyword overlap boost × length factor.
    pub relevance_score: f32,
}

/// Outcome of one `ingest` call. Partial failures never abort a batch;
/// they show up here as skips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub added: usize,
    pub skipped: usize,
}

/// Collection overview returned by `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_count: usize,
    pub unique_source_count: usize,
    pub counts_by_kind: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_deterministic() {
        let a = FragmentId::compute("some fragment text", "notes.md", Some(3));
        let b = FragmentId::compute("some fragment text", "notes.md", Some(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_full_width() {
        let id = FragmentId::compute("text", "a.md", None);
        assert_eq!(id.as_str().len(), 64);
    }

    #[test]
    fn test_identity_varies_with_source() {
        let a = FragmentId::compute("same text", "a.md", None);
        let b = FragmentId::compute("same text", "b.md", None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_varies_with_sub_index() {
        let a = FragmentId::compute("same text", "a.md", Some(0));
        let b = FragmentId::compute("same text", "a.md", Some(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_descriptor_metadata_roundtrip() {
        let desc = SourceDescriptor::web("https://example.com/page")
            .with_title("Example")
            .with_query("rust retrieval");
        let restored = SourceDescriptor::from_metadata(&desc.to_metadata());
        assert_eq!(desc, restored);
    }

    #[test]
    fn test_descriptor_defaults_to_unknown() {
        let restored = SourceDescriptor::from_metadata(&BTreeMap::new());
        assert_eq!(restored.name, UNKNOWN);
        assert!(restored.url.is_none());
    }

    #[test]
    fn test_web_descriptor_primary_key_is_url() {
        let desc = SourceDescriptor::web("https://example.com/x");
        assert_eq!(desc.primary_key(), "https://example.com/x");
    }
}
