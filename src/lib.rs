//! # Recall Engine
//!
//! A retrieval and citation engine for multi-step research sessions:
//! content-addressed fragment ingestion with deduplication, blended
//! relevance-scored vector search, and per-session citation tokens with
//! human-readable source aliases.
//!
//! The layers, bottom up:
//!
//! - [`index`]: the similarity-index trait plus in-memory and SQLite
//!   backends (nearest-neighbor by cosine distance).
//! - [`store`]: the fragment store — identity, dedup, batched ingestion,
//!   and the relevance-scored search API. The primary engine.
//! - [`citations`]: stable per-session citation tokens and aliases.
//! - [`session`]: the thin orchestrator gluing store, web search, and
//!   citations into the caller-facing operations.
//!
//! Everything else is a collaborator at an interface boundary:
//! [`embedding`] turns text into vectors, [`documents`] loads and splits
//! local files, [`websearch`] fetches raw web snippets.

pub mod citations;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod score;
pub mod session;
pub mod store;
pub mod websearch;
