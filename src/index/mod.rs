//! Similarity-index abstraction.
//!
//! The [`SimilarityIndex`] trait is the seam between the fragment store
//! and whatever nearest-neighbor primitive backs it. Two implementations
//! ship here: a brute-force in-memory index (tests, ephemeral sessions)
//! and a SQLite-backed index (the CLI default). Both use cosine distance.
//!
//! Contract notes:
//! - `insert` has insert-if-absent semantics keyed on fragment identity.
//! - `query_nearest` returns neighbors ordered by ascending distance,
//!   ties broken by insertion order.
//! - `clear` is idempotent; clearing an empty index is not an error.
//! - Backends must tolerate cold start: a collection that does not exist
//!   yet is created with the fixed cosine configuration.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FragmentId;

/// One (identity, vector, text, metadata) tuple staged for insertion.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: FragmentId,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// A candidate returned from a nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: FragmentId,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f32,
}

/// Abstract nearest-neighbor backend.
///
/// Implementations must be `Send + Sync`; the store layers its own
/// reader/writer discipline on top, so backends only need to be
/// individually consistent per call.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Insert entries, skipping any identity already present.
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// True if the identity is already indexed.
    async fn contains(&self, id: &FragmentId) -> Result<bool>;

    /// Return up to `n` nearest neighbors by cosine distance.
    async fn query_nearest(&self, vector: &[f32], n: usize) -> Result<Vec<Neighbor>>;

    /// Delete every entry whose metadata field `key` equals `value`.
    /// Returns the number of entries removed; zero matches is a no-op.
    async fn delete_matching(&self, key: &str, value: &str) -> Result<usize>;

    /// Remove all entries. Idempotent.
    async fn clear(&self) -> Result<()>;

    /// Number of indexed entries.
    async fn count(&self) -> Result<usize>;

    /// Metadata of every indexed entry, for stats aggregation.
    async fn all_metadata(&self) -> Result<Vec<BTreeMap<String, String>>>;
}
