//! Per-session citation registry.
//!
//! Assigns a small monotonically increasing token to each distinct source
//! consulted during one research request, so answers can cite
//! `[1]`, `[2]`, ... stably and without duplication. The mapping from a
//! canonicalized `(kind, name, url)` triple to its token is injective for
//! the registry's lifetime: a source never gets two tokens and a token is
//! never reassigned.
//!
//! The registry is owned by exactly one request (see
//! [`ResearchSession`](crate::session::ResearchSession)), so no locking
//! is needed. It is created empty at request start and discarded at
//! request end; `reset` exists for hosts that pool sessions.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{SourceDescriptor, SourceKind};

/// One registered source: its token, display alias, and descriptor.
#[derive(Debug, Clone)]
pub struct CitationEntry {
    pub token: u32,
    pub alias: String,
    pub source: SourceDescriptor,
}

/// Stable per-session source identity and alias assignment.
#[derive(Debug, Default)]
pub struct CitationRegistry {
    entries: Vec<CitationEntry>,
    by_key: HashMap<String, u32>,
    next_token: u32,
}

impl CitationRegistry {
    pub fn new() -> Self {
        CitationRegistry::default()
    }

    /// Return the token for this source, assigning the next one only if
    /// the source was never seen before.
    pub fn register(&mut self, source: &SourceDescriptor) -> u32 {
        let key = canonical_key(source);
        if let Some(&token) = self.by_key.get(&key) {
            return token;
        }
        self.next_token += 1;
        let token = self.next_token;
        self.by_key.insert(key, token);
        self.entries.push(CitationEntry {
            token,
            alias: alias_for(source),
            source: source.clone(),
        });
        token
    }

    /// All registered sources in ascending token order, for rendering a
    /// numbered source list.
    pub fn snapshot(&self) -> Vec<CitationEntry> {
        // Entries are pushed in token order, so no sort is needed.
        self.entries.clone()
    }

    /// Clear all entries and the token counter. Called between requests,
    /// never mid-request.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.next_token = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical identity key for a source: full-width SHA-256 over the
/// lowercased kind, the raw name, and the raw URL (empty if absent).
/// Hash collisions are treated as the same source; at 256 bits that is a
/// negligible-probability approximation.
fn canonical_key(source: &SourceDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.kind.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.name.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.url.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic human-readable alias for a source. Pure function.
///
/// - local sources: directory path and file extension stripped,
///   prefixed `"Doc: "`
/// - web sources: URL host with any leading `www.` stripped, prefixed
///   `"Web: "`; `"Web: External Source"` when the URL does not parse
pub fn alias_for(source: &SourceDescriptor) -> String {
    match source.kind {
        SourceKind::Local => {
            let basename = source
                .name
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(source.name.as_str());
            let stem = match basename.rsplit_once('.') {
                Some((stem, _ext)) if !stem.is_empty() => stem,
                _ => basename,
            };
            if stem.is_empty() {
                "Doc: Source".to_string()
            } else {
                format!("Doc: {}", stem)
            }
        }
        SourceKind::Web => {
            let raw = source.url.as_deref().unwrap_or(&source.name);
            match url::Url::parse(raw).ok().and_then(|u| {
                u.host_str()
                    .map(|h| h.strip_prefix("www.").unwrap_or(h).to_string())
            }) {
                Some(host) if !host.is_empty() => format!("Web: {}", host),
                _ => "Web: External Source".to_string(),
            }
        }
    }
}
