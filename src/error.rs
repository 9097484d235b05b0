//! Engine-surface error taxonomy.
//!
//! Only failures a caller can act on are typed. Per-fragment problems
//! during ingestion (short text, duplicate identity, a rejected
//! embedding) are skips counted in the ingest report, not errors; an
//! empty search result is `Ok(vec![])`, never an error.

use thiserror::Error;

/// Failure of an engine operation as seen by callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The embedding backend could not be reached. Retriable: the same
    /// call may succeed once the backend recovers.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The similarity index rejected an operation. Fatal for the
    /// request; the store itself stays usable.
    #[error("index backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl EngineError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::EmbeddingUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(EngineError::EmbeddingUnavailable("timeout".into()).is_retriable());
        assert!(!EngineError::BackendUnavailable("closed pool".into()).is_retriable());
    }

    #[test]
    fn test_display_names_backend() {
        let e = EngineError::EmbeddingUnavailable("connection refused".into());
        assert_eq!(
            e.to_string(),
            "embedding backend unavailable: connection refused"
        );
    }
}
