//! In-memory [`SimilarityIndex`] implementation.
//!
//! Brute-force cosine distance over all stored vectors behind a
//! `std::sync::RwLock`. Used by the test suite and for ephemeral
//! sessions that never touch disk.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::FragmentId;

use super::{IndexEntry, Neighbor, SimilarityIndex};

struct StoredEntry {
    entry: IndexEntry,
    position: u64,
}

/// Brute-force in-memory index.
pub struct MemoryIndex {
    entries: RwLock<Vec<StoredEntry>>,
    next_position: RwLock<u64>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        MemoryIndex {
            entries: RwLock::new(Vec::new()),
            next_position: RwLock::new(0),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityIndex for MemoryIndex {
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut stored = self.entries.write().unwrap();
        let mut next = self.next_position.write().unwrap();
        for entry in entries {
            if stored.iter().any(|s| s.entry.id == entry.id) {
                continue;
            }
            stored.push(StoredEntry {
                entry,
                position: *next,
            });
            *next += 1;
        }
        Ok(())
    }

    async fn contains(&self, id: &FragmentId) -> Result<bool> {
        let stored = self.entries.read().unwrap();
        Ok(stored.iter().any(|s| &s.entry.id == id))
    }

    async fn query_nearest(&self, vector: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        let stored = self.entries.read().unwrap();
        let mut scored: Vec<(f32, u64, Neighbor)> = stored
            .iter()
            .map(|s| {
                let distance = 1.0 - cosine_similarity(vector, &s.entry.vector);
                (
                    distance,
                    s.position,
                    Neighbor {
                        id: s.entry.id.clone(),
                        text: s.entry.text.clone(),
                        metadata: s.entry.metadata.clone(),
                        distance,
                    },
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(scored.into_iter().take(n).map(|(_, _, n)| n).collect())
    }

    async fn delete_matching(&self, key: &str, value: &str) -> Result<usize> {
        let mut stored = self.entries.write().unwrap();
        let before = stored.len();
        stored.retain(|s| s.entry.metadata.get(key).map(String::as_str) != Some(value));
        Ok(before - stored.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }

    async fn all_metadata(&self) -> Result<Vec<BTreeMap<String, String>>> {
        let stored = self.entries.read().unwrap();
        Ok(stored.iter().map(|s| s.entry.metadata.clone()).collect())
    }
}
