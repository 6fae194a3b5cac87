//! Analyzer capability shared by every toxicity source.

use async_trait::async_trait;
use thiserror::Error;

use crate::toxicity::score::ToxicityScore;

/// Why an analyzer produced no score. Every variant means "absent" to the
/// aggregator; none of them is surfaced to callers.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer not configured: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

/// Produce category scores for a message or signal unavailability.
///
/// Implementations must not hold locks across the await; the aggregator
/// calls every analyzer concurrently under its own timeout.
#[async_trait]
pub trait ToxicityAnalyzer: Send + Sync {
    /// Stable identifier recorded as the score's source
    fn name(&self) -> &str;

    async fn score(&self, text: &str) -> Result<ToxicityScore, AnalyzerError>;
}
