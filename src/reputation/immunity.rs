//! Immunity tiers earned through positive behaviour
//!
//! Points accumulate from clean messages, weekly bonuses and admin grants.
//! The tier is a pure function of points; strikes only affect it through
//! the per-violation point penalty.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModerationError, ModerationResult};
use crate::toxicity::Severity;

/// Immunity tier, ordered lowest to highest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmunityTier {
    #[default]
    None,
    Trusted,
    Veteran,
    Guardian,
}

impl ImmunityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImmunityTier::None => "none",
            ImmunityTier::Trusted => "trusted",
            ImmunityTier::Veteran => "veteran",
            ImmunityTier::Guardian => "guardian",
        }
    }

    /// Highest severity this tier absorbs. Severe is never in reach.
    fn ceiling(&self) -> Severity {
        match self {
            ImmunityTier::None => Severity::None,
            ImmunityTier::Trusted => Severity::Mild,
            ImmunityTier::Veteran | ImmunityTier::Guardian => Severity::Moderate,
        }
    }

    pub fn suppresses(&self, severity: Severity) -> bool {
        severity != Severity::None && severity != Severity::Severe && severity <= self.ceiling()
    }

    pub fn can_bypass_mild(&self) -> bool {
        self.suppresses(Severity::Mild)
    }

    pub fn can_bypass_moderate(&self) -> bool {
        self.suppresses(Severity::Moderate)
    }

    pub fn can_bypass_severe(&self) -> bool {
        self.suppresses(Severity::Severe)
    }

    pub fn all() -> [ImmunityTier; 4] {
        [
            ImmunityTier::None,
            ImmunityTier::Trusted,
            ImmunityTier::Veteran,
            ImmunityTier::Guardian,
        ]
    }
}

impl fmt::Display for ImmunityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImmunityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ImmunityTier::None),
            "trusted" => Ok(ImmunityTier::Trusted),
            "veteran" => Ok(ImmunityTier::Veteran),
            "guardian" => Ok(ImmunityTier::Guardian),
            other => Err(format!("unknown immunity tier '{other}'")),
        }
    }
}

/// Point thresholds for each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmunityThresholds {
    pub trusted: u64,
    pub veteran: u64,
    pub guardian: u64,
}

impl Default for ImmunityThresholds {
    fn default() -> Self {
        Self {
            trusted: 100,
            veteran: 500,
            guardian: 1000,
        }
    }
}

impl ImmunityThresholds {
    pub fn validate(&self) -> ModerationResult<()> {
        if self.trusted == 0 || self.trusted >= self.veteran || self.veteran >= self.guardian {
            return Err(ModerationError::Config(format!(
                "immunity thresholds must satisfy 0 < trusted < veteran < guardian (got {}/{}/{})",
                self.trusted, self.veteran, self.guardian
            )));
        }
        Ok(())
    }

    pub fn tier_for(&self, points: u64) -> ImmunityTier {
        if points >= self.guardian {
            ImmunityTier::Guardian
        } else if points >= self.veteran {
            ImmunityTier::Veteran
        } else if points >= self.trusted {
            ImmunityTier::Trusted
        } else {
            ImmunityTier::None
        }
    }

    /// Points required for the next tier, `None` once at the top
    pub fn next_threshold(&self, points: u64) -> Option<u64> {
        [self.trusted, self.veteran, self.guardian]
            .into_iter()
            .find(|threshold| points < *threshold)
    }
}

/// Severity before and after immunity was considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassOutcome {
    pub raw: Severity,
    pub effective: Severity,
    pub suppressed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImmunityEvaluator {
    thresholds: ImmunityThresholds,
}

impl ImmunityEvaluator {
    pub fn new(thresholds: ImmunityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ImmunityThresholds {
        &self.thresholds
    }

    pub fn tier_for(&self, points: u64) -> ImmunityTier {
        self.thresholds.tier_for(points)
    }

    pub fn evaluate(&self, tier: ImmunityTier, severity: Severity) -> BypassOutcome {
        if tier.suppresses(severity) {
            BypassOutcome {
                raw: severity,
                effective: Severity::None,
                suppressed: true,
            }
        } else {
            BypassOutcome {
                raw: severity,
                effective: severity,
                suppressed: false,
            }
        }
    }

    pub fn status(&self, points: u64, active_strikes: u32) -> ImmunityStatus {
        let tier = self.thresholds.tier_for(points);
        let next_threshold = self.thresholds.next_threshold(points);
        ImmunityStatus {
            tier,
            points,
            active_strikes,
            next_threshold,
            points_to_next: next_threshold.map(|t| t - points),
            can_bypass_mild: tier.can_bypass_mild(),
            can_bypass_moderate: tier.can_bypass_moderate(),
            can_bypass_severe: tier.can_bypass_severe(),
        }
    }
}

/// Read-only immunity summary for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmunityStatus {
    pub tier: ImmunityTier,
    pub points: u64,
    pub active_strikes: u32,
    pub next_threshold: Option<u64>,
    pub points_to_next: Option<u64>,
    pub can_bypass_mild: bool,
    pub can_bypass_moderate: bool,
    pub can_bypass_severe: bool,
}
