//! Injected recommendation capability
//!
//! The actual provider (an LLM function in production) is opaque to this
//! crate: it receives a seed book and returns up to five similar titles as
//! plain strings. Callers inject an implementation; the default does
//! nothing.

use async_trait::async_trait;

use crate::error::ServiceError;

/// Providers return at most this many suggestions; anything extra is cut.
pub const MAX_SUGGESTIONS: usize = 5;

#[async_trait]
pub trait Recommender: Send + Sync {
    /// Suggest titles similar to the given book. Entries may be formatted
    /// as "Title by Author".
    async fn similar_books(
        &self,
        title: &str,
        authors: &[String],
        description: &str,
    ) -> Result<Vec<String>, ServiceError>;
}

/// Recommender that never suggests anything. Used when no provider is
/// configured.
pub struct NoopRecommender;

#[async_trait]
impl Recommender for NoopRecommender {
    async fn similar_books(
        &self,
        _title: &str,
        _authors: &[String],
        _description: &str,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(Vec::new())
    }
}

/// Cut a "Title by Author" suggestion down to the title part before it is
/// re-searched.
pub fn title_part(suggestion: &str) -> &str {
    suggestion.split(" by ").next().unwrap_or(suggestion).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_title_and_author() {
        assert_eq!(title_part("Dune by Frank Herbert"), "Dune");
        assert_eq!(title_part("Dune"), "Dune");
        assert_eq!(title_part("  Dune  "), "Dune");
    }

    #[test]
    fn byword_inside_a_word_is_untouched() {
        assert_eq!(title_part("Goodbye Columbus"), "Goodbye Columbus");
    }

    #[tokio::test]
    async fn noop_returns_nothing() {
        let suggestions = NoopRecommender
            .similar_books("Dune", &[], "")
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }
}
