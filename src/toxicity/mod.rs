//! Toxicity scoring
//!
//! ```text
//! ┌──────────────────┐
//! │ PatternAnalyzer  │──┐   (always present, local)
//! └──────────────────┘  │
//! ┌──────────────────┐  │   ┌────────────────────┐     ┌───────────┐
//! │ Perspective      │──┼──►│ ToxicityAggregator │────►│ Severity  │
//! └──────────────────┘  │   │ (max per category) │     └───────────┘
//! ┌──────────────────┐  │   └────────────────────┘
//! │ OpenAI moderation│──┘   each call bounded by a timeout;
//! └──────────────────┘      failures count as "absent"
//! ```

mod aggregator;
mod analyzer;
pub mod http;
mod openai;
mod patterns;
mod perspective;
mod score;

pub use aggregator::{normalize_text, Assessment, ToxicityAggregator, MERGED_SOURCE};
pub use analyzer::{AnalyzerError, ToxicityAnalyzer};
pub use openai::{OpenAiModerationAnalyzer, DEFAULT_OPENAI_ENDPOINT, OPENAI_ANALYZER_NAME};
pub use patterns::{PatternAnalyzer, PATTERN_ANALYZER_NAME};
pub use perspective::{PerspectiveAnalyzer, DEFAULT_PERSPECTIVE_ENDPOINT, PERSPECTIVE_ANALYZER_NAME};
pub use score::{Severity, SeverityThresholds, ToxicityScore};
