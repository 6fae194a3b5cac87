//! Strike records and the state transitions applied to them
//!
//! Every ledger mutation is expressed as a [`LedgerOp`] and applied by
//! [`StrikeRecord::apply`]. Stores run that function inside whatever atomic
//! unit they have (a map entry lock, a row lock in a transaction), so the
//! load/modify/save of one key can never interleave with another update
//! of the same key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModerationError, ModerationResult};
use crate::reputation::immunity::{ImmunityThresholds, ImmunityTier};
use crate::toxicity::Severity;

pub const MAX_ID_LEN: usize = 64;

/// Violations kept per record
pub const HISTORY_LIMIT: usize = 20;

/// Validated (community, user) pair identifying one ledger record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemberKey {
    community_id: String,
    user_id: String,
}

impl MemberKey {
    pub fn new(community_id: impl Into<String>, user_id: impl Into<String>) -> ModerationResult<Self> {
        let community_id = community_id.into();
        let user_id = user_id.into();
        validate_id("community id", &community_id)?;
        validate_id("user id", &user_id)?;
        Ok(Self { community_id, user_id })
    }

    /// Key for ids that were validated when the record was first written
    pub(crate) fn from_stored(community_id: &str, user_id: &str) -> Self {
        Self {
            community_id: community_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn community_id(&self) -> &str {
        &self.community_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.community_id, self.user_id)
    }
}

/// Reject empty, oversized, or whitespace/control-bearing identifiers
pub fn validate_id(kind: &str, value: &str) -> ModerationResult<()> {
    if value.is_empty() {
        return Err(ModerationError::Validation(format!("{kind} must not be empty")));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(ModerationError::Validation(format!(
            "{kind} exceeds {MAX_ID_LEN} characters"
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ModerationError::Validation(format!(
            "{kind} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Strike window and point penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPolicy {
    /// Length of a strike window, started by the first violation after a reset
    pub window_minutes: i64,

    /// Positive points removed per violation (floored at zero)
    pub strike_penalty: u64,

    /// How long after its window ended a pointless record is kept
    pub cleanup_grace_hours: i64,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            strike_penalty: 10,
            cleanup_grace_hours: 24,
        }
    }
}

impl LedgerPolicy {
    pub fn validate(&self) -> ModerationResult<()> {
        if self.window_minutes <= 0 {
            return Err(ModerationError::Config("strike window must be positive".to_string()));
        }
        if self.cleanup_grace_hours < 0 {
            return Err(ModerationError::Config("cleanup grace must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::hours(self.cleanup_grace_hours)
    }
}

/// Positive-behaviour rewards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Overall score below which a message counts as clean
    pub clean_threshold: f64,
    pub clean_points: u64,

    /// Bonus for longer messages with no signal at all
    pub quality_points: u64,
    pub quality_min_chars: usize,

    /// Minimum spacing between message-triggered awards
    pub award_interval_secs: i64,

    pub weekly_bonus: u64,
    /// Days without a violation required for the weekly bonus
    pub weekly_quiet_days: i64,
    /// Minimum days between two weekly bonuses for one member
    pub weekly_bonus_spacing_days: i64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            clean_threshold: 0.1,
            clean_points: 1,
            quality_points: 5,
            quality_min_chars: 50,
            award_interval_secs: 60,
            weekly_bonus: 50,
            weekly_quiet_days: 7,
            weekly_bonus_spacing_days: 6,
        }
    }
}

impl RewardPolicy {
    pub fn validate(&self) -> ModerationResult<()> {
        if !self.clean_threshold.is_finite() || self.clean_threshold <= 0.0 || self.clean_threshold > 1.0 {
            return Err(ModerationError::Config(format!(
                "clean threshold must be in (0, 1], got {}",
                self.clean_threshold
            )));
        }
        if self.award_interval_secs < 0 || self.weekly_quiet_days < 0 || self.weekly_bonus_spacing_days < 0 {
            return Err(ModerationError::Config(
                "award interval and weekly bonus periods must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn award_interval(&self) -> Duration {
        Duration::seconds(self.award_interval_secs)
    }

    pub fn weekly_quiet_period(&self) -> Duration {
        Duration::days(self.weekly_quiet_days)
    }

    pub fn weekly_bonus_spacing(&self) -> Duration {
        Duration::days(self.weekly_bonus_spacing_days)
    }

    /// Points earned by one non-violating message. Clean and quality awards
    /// stack.
    pub fn message_award(&self, overall: f64, text_chars: usize) -> u64 {
        let mut amount = 0;
        if overall < self.clean_threshold {
            amount += self.clean_points;
        }
        if text_chars > self.quality_min_chars && overall == 0.0 {
            amount += self.quality_points;
        }
        amount
    }
}

/// One atomic ledger mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    RecordViolation {
        at: DateTime<Utc>,
        window: Duration,
        penalty: u64,
        severity: Severity,
        category: Option<String>,
    },
    /// Add points unless the last award is closer than `min_interval`
    AwardPoints {
        amount: u64,
        at: DateTime<Utc>,
        min_interval: Option<Duration>,
    },
    /// Weekly bonus: add points only when there are no active strikes, no
    /// violation within `quiet_period` and no bonus within `spacing`
    AwardIfQuiet {
        amount: u64,
        at: DateTime<Utc>,
        quiet_period: Duration,
        spacing: Duration,
    },
    ClearStrikes {
        at: DateTime<Utc>,
    },
}

impl LedgerOp {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            LedgerOp::RecordViolation { at, .. }
            | LedgerOp::AwardPoints { at, .. }
            | LedgerOp::AwardIfQuiet { at, .. }
            | LedgerOp::ClearStrikes { at } => *at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerOutcome {
    Violation {
        count: u32,
        points_lost: u64,
        new_window: bool,
    },
    Awarded {
        amount: u64,
    },
    Throttled,
    Ineligible,
    Cleared {
        previous: u32,
    },
}

/// Record state after an op plus what the op did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub record: StrikeRecord,
    pub outcome: LedgerOutcome,
    pub previous_tier: ImmunityTier,
}

/// One violation kept in a record's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEntry {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    /// Dominant toxicity category, when an analyzer named one
    pub category: Option<String>,
}

/// How worrying a member's violations in the current window look
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPattern {
    Clean,
    Minor,
    Concerning,
    Problematic,
    Dangerous,
}

impl ViolationPattern {
    /// Any severe violation is dangerous; otherwise graded by count
    pub fn classify(history: &[ViolationEntry]) -> Self {
        if history.is_empty() {
            ViolationPattern::Clean
        } else if history.iter().any(|v| v.severity == Severity::Severe) {
            ViolationPattern::Dangerous
        } else if history.len() >= 5 {
            ViolationPattern::Problematic
        } else if history.len() >= 2 {
            ViolationPattern::Concerning
        } else {
            ViolationPattern::Minor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub pattern: ViolationPattern,
    pub total: usize,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    pub span_minutes: i64,
}

impl PatternSummary {
    pub fn from_history(history: &[ViolationEntry]) -> Self {
        let mut severity_counts = BTreeMap::new();
        for entry in history {
            *severity_counts.entry(entry.severity).or_insert(0) += 1;
        }
        let first_at = history.iter().map(|v| v.at).min();
        let last_at = history.iter().map(|v| v.at).max();
        let span_minutes = match (first_at, last_at) {
            (Some(first), Some(last)) => (last - first).num_minutes(),
            _ => 0,
        };

        Self {
            pattern: ViolationPattern::classify(history),
            total: history.len(),
            severity_counts,
            first_at,
            last_at,
            span_minutes,
        }
    }
}

/// Per-member strike and points state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeRecord {
    pub community_id: String,
    pub user_id: String,

    /// Violations in the current window. Stale once `window_reset_at` passes.
    pub violation_count: u32,
    pub window_reset_at: DateTime<Utc>,

    pub positive_points: u64,
    /// Cached tier, recomputed on every mutation
    pub immunity_tier: ImmunityTier,
    pub last_positive_update: Option<DateTime<Utc>>,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub last_weekly_bonus_at: Option<DateTime<Utc>>,

    /// Violations of the current window, oldest first, at most
    /// [`HISTORY_LIMIT`]. Emptied when a new window starts or strikes are
    /// cleared.
    #[serde(default)]
    pub history: Vec<ViolationEntry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrikeRecord {
    pub fn new(key: &MemberKey, at: DateTime<Utc>) -> Self {
        Self {
            community_id: key.community_id().to_string(),
            user_id: key.user_id().to_string(),
            violation_count: 0,
            window_reset_at: at,
            positive_points: 0,
            immunity_tier: ImmunityTier::None,
            last_positive_update: None,
            last_violation_at: None,
            last_weekly_bonus_at: None,
            history: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::from_stored(&self.community_id, &self.user_id)
    }

    /// Violation count as seen at `now`, without writing the reset back
    pub fn active_count(&self, now: DateTime<Utc>) -> u32 {
        if now >= self.window_reset_at {
            0
        } else {
            self.violation_count
        }
    }

    pub fn has_active_strikes(&self, now: DateTime<Utc>) -> bool {
        self.active_count(now) > 0
    }

    /// No active strikes and no violation within `quiet_period`
    pub fn is_quiet(&self, now: DateTime<Utc>, quiet_period: Duration) -> bool {
        !self.has_active_strikes(now)
            && self
                .last_violation_at
                .map_or(true, |last| now - last >= quiet_period)
    }

    /// Eligible for the weekly bonus at `now`
    pub fn weekly_bonus_due(&self, now: DateTime<Utc>, quiet_period: Duration, spacing: Duration) -> bool {
        self.is_quiet(now, quiet_period)
            && self
                .last_weekly_bonus_at
                .map_or(true, |last| now - last >= spacing)
    }

    /// History of the window active at `now` (empty once it has lapsed)
    pub fn active_history(&self, now: DateTime<Utc>) -> &[ViolationEntry] {
        if self.has_active_strikes(now) {
            &self.history
        } else {
            &[]
        }
    }

    /// Apply `op` and report what changed, keeping the tier in sync
    pub fn apply(&mut self, op: &LedgerOp, tiers: &ImmunityThresholds) -> LedgerOutcome {
        let outcome = match op {
            LedgerOp::RecordViolation { at, window, penalty, severity, category } => {
                let (at, penalty) = (*at, *penalty);
                let new_window = at >= self.window_reset_at;
                if new_window {
                    self.violation_count = 0;
                    self.window_reset_at = at + *window;
                    self.history.clear();
                }
                self.violation_count = self.violation_count.saturating_add(1);
                self.history.push(ViolationEntry {
                    at,
                    severity: *severity,
                    category: category.clone(),
                });
                if self.history.len() > HISTORY_LIMIT {
                    let excess = self.history.len() - HISTORY_LIMIT;
                    self.history.drain(..excess);
                }

                let before = self.positive_points;
                self.positive_points = before.saturating_sub(penalty);
                self.last_violation_at = Some(at);
                self.updated_at = at;

                LedgerOutcome::Violation {
                    count: self.violation_count,
                    points_lost: before - self.positive_points,
                    new_window,
                }
            }
            LedgerOp::AwardPoints { amount, at, min_interval } => {
                let throttled = match (min_interval, self.last_positive_update) {
                    (Some(interval), Some(last)) => *at - last < *interval,
                    _ => false,
                };
                if throttled {
                    LedgerOutcome::Throttled
                } else {
                    self.add_points(*amount, *at)
                }
            }
            LedgerOp::AwardIfQuiet { amount, at, quiet_period, spacing } => {
                if self.weekly_bonus_due(*at, *quiet_period, *spacing) {
                    self.last_weekly_bonus_at = Some(*at);
                    self.add_points(*amount, *at)
                } else {
                    LedgerOutcome::Ineligible
                }
            }
            LedgerOp::ClearStrikes { at } => {
                let previous = self.active_count(*at);
                self.violation_count = 0;
                self.window_reset_at = *at;
                self.history.clear();
                self.updated_at = *at;
                LedgerOutcome::Cleared { previous }
            }
        };

        self.immunity_tier = tiers.tier_for(self.positive_points);
        outcome
    }

    /// [`apply`](Self::apply), packaged with the post-op record for callers
    pub fn transition(&mut self, op: &LedgerOp, tiers: &ImmunityThresholds) -> LedgerUpdate {
        let previous_tier = self.immunity_tier;
        let outcome = self.apply(op, tiers);
        LedgerUpdate {
            record: self.clone(),
            outcome,
            previous_tier,
        }
    }

    fn add_points(&mut self, amount: u64, at: DateTime<Utc>) -> LedgerOutcome {
        self.positive_points = self.positive_points.saturating_add(amount);
        self.last_positive_update = Some(at);
        self.updated_at = at;
        LedgerOutcome::Awarded { amount }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn key() -> MemberKey {
        MemberKey::new("guild-1", "user-1").unwrap()
    }

    fn violation(at: DateTime<Utc>) -> LedgerOp {
        violation_of(at, Severity::Moderate)
    }

    fn violation_of(at: DateTime<Utc>, severity: Severity) -> LedgerOp {
        LedgerOp::RecordViolation {
            at,
            window: Duration::minutes(60),
            penalty: 10,
            severity,
            category: Some("insult".to_string()),
        }
    }

    #[test]
    fn test_member_key_validation() {
        assert!(MemberKey::new("guild", "user").is_ok());
        assert!(MemberKey::new("", "user").is_err());
        assert!(MemberKey::new("guild", "has space").is_err());
        assert!(MemberKey::new("guild", "tab\tuser").is_err());
        assert!(MemberKey::new("g".repeat(64), "user").is_ok());
        assert!(matches!(
            MemberKey::new("g".repeat(65), "user"),
            Err(ModerationError::Validation(_))
        ));
    }

    #[test]
    fn test_violations_count_within_window() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());

        for i in 1..=3 {
            let outcome = record.apply(&violation(t0() + Duration::minutes(i)), &tiers);
            assert!(matches!(outcome, LedgerOutcome::Violation { count, .. } if count == i as u32));
        }
        // window started by the first violation
        assert_eq!(record.window_reset_at, t0() + Duration::minutes(61));
    }

    #[test]
    fn test_reset_exactly_at_boundary() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        record.apply(&violation(t0()), &tiers);
        record.apply(&violation(t0()), &tiers);
        let reset_at = record.window_reset_at;

        let mut just_before = record.clone();
        let outcome = just_before.apply(&violation(reset_at - Duration::milliseconds(1)), &tiers);
        assert!(matches!(outcome, LedgerOutcome::Violation { count: 3, new_window: false, .. }));

        let outcome = record.apply(&violation(reset_at), &tiers);
        assert!(matches!(outcome, LedgerOutcome::Violation { count: 1, new_window: true, .. }));
        assert_eq!(record.window_reset_at, reset_at + Duration::minutes(60));
    }

    #[test]
    fn test_active_count_is_lazy() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        assert_eq!(record.active_count(t0()), 0);

        record.apply(&violation(t0()), &tiers);
        assert_eq!(record.active_count(t0() + Duration::minutes(59)), 1);
        assert_eq!(record.active_count(t0() + Duration::minutes(60)), 0);
        assert_eq!(record.violation_count, 1);
    }

    #[test]
    fn test_penalty_floors_at_zero_and_demotes() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        record.apply(&LedgerOp::AwardPoints { amount: 105, at: t0(), min_interval: None }, &tiers);
        assert_eq!(record.immunity_tier, ImmunityTier::Trusted);

        let outcome = record.apply(&violation(t0()), &tiers);
        assert!(matches!(outcome, LedgerOutcome::Violation { points_lost: 10, .. }));
        assert_eq!(record.positive_points, 95);
        assert_eq!(record.immunity_tier, ImmunityTier::None);

        let mut poor = StrikeRecord::new(&key(), t0());
        poor.positive_points = 3;
        let outcome = poor.apply(&violation(t0()), &tiers);
        assert!(matches!(outcome, LedgerOutcome::Violation { points_lost: 3, .. }));
        assert_eq!(poor.positive_points, 0);
    }

    #[test]
    fn test_award_throttle() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        let award = |at| LedgerOp::AwardPoints { amount: 1, at, min_interval: Some(Duration::seconds(60)) };

        assert_eq!(record.apply(&award(t0()), &tiers), LedgerOutcome::Awarded { amount: 1 });
        assert_eq!(record.apply(&award(t0() + Duration::seconds(30)), &tiers), LedgerOutcome::Throttled);
        assert_eq!(
            record.apply(&award(t0() + Duration::seconds(60)), &tiers),
            LedgerOutcome::Awarded { amount: 1 }
        );
        assert_eq!(record.positive_points, 2);

        // unthrottled award ignores spacing
        let grant = LedgerOp::AwardPoints { amount: 50, at: t0() + Duration::seconds(61), min_interval: None };
        assert_eq!(record.apply(&grant, &tiers), LedgerOutcome::Awarded { amount: 50 });
    }

    #[test]
    fn test_clear_keeps_points() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        record.positive_points = 40;
        record.apply(&violation(t0()), &tiers);
        record.apply(&violation(t0()), &tiers);

        let at = t0() + Duration::minutes(5);
        assert_eq!(record.apply(&LedgerOp::ClearStrikes { at }, &tiers), LedgerOutcome::Cleared { previous: 2 });
        assert_eq!(record.violation_count, 0);
        assert_eq!(record.window_reset_at, at);
        assert_eq!(record.positive_points, 20);
    }

    #[test]
    fn test_award_if_quiet() {
        let tiers = ImmunityThresholds::default();
        let quiet = Duration::days(7);
        let mut record = StrikeRecord::new(&key(), t0());
        record.apply(&violation(t0()), &tiers);

        let bonus = |at| LedgerOp::AwardIfQuiet { amount: 50, at, quiet_period: quiet, spacing: Duration::days(6) };

        assert_eq!(record.apply(&bonus(t0() + Duration::days(3)), &tiers), LedgerOutcome::Ineligible);
        assert_eq!(record.apply(&bonus(t0() + Duration::days(7)), &tiers), LedgerOutcome::Awarded { amount: 50 });

        // paid once per spacing period, however often it is requested
        let retry = t0() + Duration::days(7) + Duration::minutes(1);
        assert_eq!(record.apply(&bonus(retry), &tiers), LedgerOutcome::Ineligible);
        assert_eq!(record.positive_points, 50);

        let next_week = t0() + Duration::days(13);
        assert_eq!(record.apply(&bonus(next_week), &tiers), LedgerOutcome::Awarded { amount: 50 });
        assert_eq!(record.last_weekly_bonus_at, Some(next_week));
    }

    #[test]
    fn test_history_is_bounded_and_follows_window() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        for i in 0..25 {
            record.apply(&violation(t0() + Duration::seconds(i)), &tiers);
        }
        assert_eq!(record.history.len(), HISTORY_LIMIT);
        assert_eq!(record.history[0].at, t0() + Duration::seconds(5));
        assert_eq!(record.history[0].category.as_deref(), Some("insult"));

        let next_window = record.window_reset_at;
        record.apply(&violation_of(next_window, Severity::Mild), &tiers);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].severity, Severity::Mild);

        record.apply(&LedgerOp::ClearStrikes { at: next_window }, &tiers);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_violation_pattern() {
        let tiers = ImmunityThresholds::default();
        let mut record = StrikeRecord::new(&key(), t0());
        assert_eq!(PatternSummary::from_history(&record.history).pattern, ViolationPattern::Clean);

        record.apply(&violation(t0()), &tiers);
        assert_eq!(ViolationPattern::classify(&record.history), ViolationPattern::Minor);

        record.apply(&violation(t0() + Duration::minutes(10)), &tiers);
        assert_eq!(ViolationPattern::classify(&record.history), ViolationPattern::Concerning);

        for i in 0..3 {
            record.apply(&violation(t0() + Duration::minutes(20 + i)), &tiers);
        }
        assert_eq!(ViolationPattern::classify(&record.history), ViolationPattern::Problematic);

        record.apply(&violation_of(t0() + Duration::minutes(30), Severity::Severe), &tiers);
        let summary = PatternSummary::from_history(&record.history);
        assert_eq!(summary.pattern, ViolationPattern::Dangerous);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.severity_counts[&Severity::Moderate], 5);
        assert_eq!(summary.severity_counts[&Severity::Severe], 1);
        assert_eq!(summary.span_minutes, 30);

        assert!(record.active_history(t0() + Duration::minutes(60)).is_empty());
    }

    #[test]
    fn test_message_award_stacks() {
        let policy = RewardPolicy::default();
        assert_eq!(policy.message_award(0.0, 10), 1);
        assert_eq!(policy.message_award(0.0, 51), 6);
        assert_eq!(policy.message_award(0.05, 80), 1);
        assert_eq!(policy.message_award(0.2, 80), 0);
    }
}
