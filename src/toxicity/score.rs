//! Toxicity Score Types and Severity Thresholds
//!
//! Analyzers report per-category scores in [0.0, 1.0]. The overall score of a
//! message is the maximum across categories, so the most dangerous category
//! dominates. Severity tiers are derived from the overall score using
//! deployment-configurable thresholds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModerationError, ModerationResult};

/// Classified severity of a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }

    pub fn is_violation(&self) -> bool {
        *self != Severity::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall-score cut-offs for each severity tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Overall score at or above which a message is severe
    pub severe: f64,

    /// Overall score at or above which a message is moderate
    pub moderate: f64,

    /// Overall score at or above which a message is mild
    pub mild: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            severe: 0.8,
            moderate: 0.6,
            mild: 0.4,
        }
    }
}

impl SeverityThresholds {
    /// Thresholds must be strictly ordered inside (0, 1].
    pub fn validate(&self) -> ModerationResult<()> {
        let all = [self.mild, self.moderate, self.severe];
        if all.iter().any(|t| !t.is_finite()) {
            return Err(ModerationError::Config(
                "toxicity thresholds must be finite numbers".to_string(),
            ));
        }
        if !(self.mild > 0.0 && self.mild < self.moderate && self.moderate < self.severe && self.severe <= 1.0) {
            return Err(ModerationError::Config(format!(
                "toxicity thresholds must satisfy 0 < mild < moderate < severe <= 1 (got mild={}, moderate={}, severe={})",
                self.mild, self.moderate, self.severe
            )));
        }
        Ok(())
    }

    pub fn classify(&self, overall: f64) -> Severity {
        if overall >= self.severe {
            Severity::Severe
        } else if overall >= self.moderate {
            Severity::Moderate
        } else if overall >= self.mild {
            Severity::Mild
        } else {
            Severity::None
        }
    }
}

/// Category scores produced by one analyzer (or merged across several)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToxicityScore {
    /// Which analyzer produced this score ("merged" after aggregation)
    pub source: String,

    pub categories: BTreeMap<String, f64>,
}

impl ToxicityScore {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            categories: BTreeMap::new(),
        }
    }

    pub fn from_categories<I, K>(source: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut score = Self::new(source);
        for (category, value) in categories {
            score.insert(category, value);
        }
        score
    }

    /// Record a category score. Values are clamped to [0, 1]; NaN/inf are
    /// dropped. A repeated category keeps the higher value.
    pub fn insert(&mut self, category: impl Into<String>, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        let slot = self.categories.entry(category.into()).or_insert(value);
        if value > *slot {
            *slot = value;
        }
    }

    /// Max across categories (0.0 when nothing was reported)
    pub fn overall(&self) -> f64 {
        self.categories.values().copied().fold(0.0, f64::max)
    }

    /// Highest-scoring category, if any
    pub fn dominant_category(&self) -> Option<(&str, f64)> {
        self.categories
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, value)| (name.as_str(), *value))
    }

    /// Fold another analyzer's output into this one, category by category,
    /// keeping the maximum.
    pub fn merge_max(&mut self, other: &ToxicityScore) {
        for (category, value) in &other.categories {
            self.insert(category.clone(), *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
