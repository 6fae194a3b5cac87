//! Toxicity Aggregator - merges every analyzer's view of a message
//!
//! All analyzers (the local pattern analyzer first, then any configured
//! network analyzers) are called concurrently, each under its own deadline.
//! A failure or timeout only removes that analyzer from the merge; the
//! pattern analyzer is always present, so a severity is always produced.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::toxicity::analyzer::{AnalyzerError, ToxicityAnalyzer};
use crate::toxicity::patterns::PatternAnalyzer;
use crate::toxicity::score::{Severity, SeverityThresholds, ToxicityScore};

pub const MERGED_SOURCE: &str = "merged";

/// Merged result of one message's analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    /// Category-wise maximum across every analyzer that answered
    pub score: ToxicityScore,
    pub severity: Severity,
    /// Analyzers that contributed a score
    pub sources: Vec<String>,
    /// Analyzers that errored or timed out
    pub unavailable: Vec<String>,
}

impl Assessment {
    pub fn overall(&self) -> f64 {
        self.score.overall()
    }

    fn empty() -> Self {
        Self {
            score: ToxicityScore::new(MERGED_SOURCE),
            severity: Severity::None,
            sources: Vec::new(),
            unavailable: Vec::new(),
        }
    }
}

pub struct ToxicityAggregator {
    analyzers: Vec<Arc<dyn ToxicityAnalyzer>>,
    thresholds: SeverityThresholds,
    timeout: Duration,
}

impl ToxicityAggregator {
    /// Aggregator with only the pattern fallback registered
    pub fn new(thresholds: SeverityThresholds, timeout: Duration) -> Self {
        Self {
            analyzers: vec![Arc::new(PatternAnalyzer::new())],
            thresholds,
            timeout,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ToxicityAnalyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn analyzer_names(&self) -> Vec<String> {
        self.analyzers.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Score `text` with every analyzer and classify the merged result.
    pub async fn assess(&self, text: &str) -> Assessment {
        let text = normalize_text(text);
        if text.is_empty() {
            return Assessment::empty();
        }

        let timeout = self.timeout;
        let calls = self.analyzers.iter().map(|analyzer| {
            let text = text.as_str();
            async move {
                let outcome = match tokio::time::timeout(timeout, analyzer.score(text)).await {
                    Ok(result) => result,
                    Err(_) => Err(AnalyzerError::Timeout(timeout.as_millis() as u64)),
                };
                (analyzer.name().to_string(), outcome)
            }
        });

        let mut assessment = Assessment::empty();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(score) => {
                    debug!(analyzer = %name, overall = score.overall(), "analyzer answered");
                    assessment.score.merge_max(&score);
                    assessment.sources.push(name);
                }
                Err(e) => {
                    warn!(analyzer = %name, error = %e, "analyzer unavailable, continuing without it");
                    assessment.unavailable.push(name);
                }
            }
        }

        assessment.severity = self.thresholds.classify(assessment.score.overall());
        assessment
    }
}

/// Strip zero-width characters and collapse whitespace runs.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200b}'..='\u{200d}' | '\u{feff}'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
