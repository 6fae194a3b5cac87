//! Strike Ledger - orchestrates strike and points bookkeeping
//!
//! Owns the policies and turns high-level requests (a violation, a clean
//! message, an admin grant) into [`LedgerOp`]s applied through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::StrikeStore;
use crate::error::{ModerationError, ModerationResult};
use crate::reputation::escalation::{EnforcementAction, EscalationTable};
use crate::reputation::immunity::{ImmunityEvaluator, ImmunityStatus, ImmunityTier};
use crate::reputation::record::{
    validate_id, LedgerOp, LedgerOutcome, LedgerPolicy, LedgerUpdate, MemberKey, PatternSummary,
    RewardPolicy, StrikeRecord, ViolationEntry,
};
use crate::toxicity::Severity;

/// Strike recorded for one violation
#[derive(Debug, Clone, Serialize)]
pub struct ViolationOutcome {
    pub count: u32,
    pub action: EnforcementAction,
    pub points_lost: u64,
    pub record: StrikeRecord,
}

/// Result of a points award attempt
#[derive(Debug, Clone, Serialize)]
pub struct PointsAward {
    /// 0 when throttled
    pub awarded: u64,
    pub total: u64,
    pub tier: ImmunityTier,
    pub throttled: bool,
    pub promoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAward {
    pub user_id: String,
    pub awarded: u64,
    pub total: u64,
    pub tier: ImmunityTier,
}

/// Read-only view of a member's strikes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeStatus {
    pub community_id: String,
    pub user_id: String,
    pub active_strikes: u32,
    /// Only set while strikes are active
    pub window_resets_at: Option<DateTime<Utc>>,
    pub positive_points: u64,
    pub immunity_tier: ImmunityTier,
    pub last_violation_at: Option<DateTime<Utc>>,
    /// Action the next violation would trigger
    pub next_action: EnforcementAction,
    /// What the active strikes were for, oldest first
    pub recent_violations: Vec<ViolationEntry>,
    pub pattern: PatternSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub positive_points: u64,
    pub immunity_tier: ImmunityTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolatorSummary {
    pub user_id: String,
    pub active_strikes: u32,
}

/// Aggregate ledger figures for a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub tracked_users: usize,
    pub users_with_strikes: usize,
    pub total_active_strikes: u64,
    pub top_violators: Vec<ViolatorSummary>,
    pub tier_distribution: BTreeMap<ImmunityTier, usize>,
}

const TOP_VIOLATORS: usize = 5;

pub struct StrikeLedger {
    store: Arc<dyn StrikeStore>,
    policy: LedgerPolicy,
    rewards: RewardPolicy,
    immunity: ImmunityEvaluator,
    escalation: EscalationTable,
}

impl StrikeLedger {
    pub fn new(
        store: Arc<dyn StrikeStore>,
        policy: LedgerPolicy,
        rewards: RewardPolicy,
        immunity: ImmunityEvaluator,
        escalation: EscalationTable,
    ) -> Self {
        Self {
            store,
            policy,
            rewards,
            immunity,
            escalation,
        }
    }

    pub fn rewards(&self) -> &RewardPolicy {
        &self.rewards
    }

    pub fn immunity(&self) -> &ImmunityEvaluator {
        &self.immunity
    }

    async fn apply(&self, key: &MemberKey, op: LedgerOp) -> ModerationResult<LedgerUpdate> {
        let update = self.store.apply(key, &op, self.immunity.thresholds()).await?;
        if update.record.immunity_tier != update.previous_tier {
            info!(
                member = %key,
                from = %update.previous_tier,
                to = %update.record.immunity_tier,
                points = update.record.positive_points,
                "Immunity tier changed"
            );
        }
        Ok(update)
    }

    /// Tier of the member as currently stored (none for unknown members)
    pub async fn current_tier(&self, key: &MemberKey) -> ModerationResult<ImmunityTier> {
        let record = self.store.get(key).await?;
        Ok(record
            .map(|r| self.immunity.tier_for(r.positive_points))
            .unwrap_or_default())
    }

    pub async fn record_violation(
        &self,
        key: &MemberKey,
        severity: Severity,
        category: Option<&str>,
        at: DateTime<Utc>,
    ) -> ModerationResult<ViolationOutcome> {
        let op = LedgerOp::RecordViolation {
            at,
            window: self.policy.window(),
            penalty: self.policy.strike_penalty,
            severity,
            category: category.map(str::to_string),
        };
        let update = self.apply(key, op).await?;

        match update.outcome {
            LedgerOutcome::Violation { count, points_lost, .. } => {
                let action = self.escalation.action_for(count);
                debug!(member = %key, count = count, action = %action, "Violation recorded");
                Ok(ViolationOutcome {
                    count,
                    action,
                    points_lost,
                    record: update.record,
                })
            }
            other => Err(unexpected(key, other)),
        }
    }

    /// Add points, honouring `min_interval` since the last award when given
    pub async fn award_points(
        &self,
        key: &MemberKey,
        amount: u64,
        at: DateTime<Utc>,
        min_interval: Option<chrono::Duration>,
    ) -> ModerationResult<PointsAward> {
        if amount == 0 {
            return Err(ModerationError::Validation("award amount must be positive".to_string()));
        }
        let update = self.apply(key, LedgerOp::AwardPoints { amount, at, min_interval }).await?;
        Ok(points_award(&update))
    }

    /// Clean/quality award for a non-violating message; `None` when the
    /// message earns nothing
    pub async fn award_message_points(
        &self,
        key: &MemberKey,
        overall: f64,
        text_chars: usize,
        at: DateTime<Utc>,
    ) -> ModerationResult<Option<PointsAward>> {
        let amount = self.rewards.message_award(overall, text_chars);
        if amount == 0 {
            return Ok(None);
        }
        let award = self
            .award_points(key, amount, at, Some(self.rewards.award_interval()))
            .await?;
        Ok(Some(award))
    }

    /// Admin grant, never throttled
    pub async fn grant_points(&self, key: &MemberKey, amount: u64, at: DateTime<Utc>) -> ModerationResult<PointsAward> {
        let award = self.award_points(key, amount, at, None).await?;
        info!(member = %key, amount = amount, total = award.total, "Points granted");
        Ok(award)
    }

    /// Bonus for every member of the community with a clean recent history
    pub async fn award_weekly_bonus(&self, community_id: &str, at: DateTime<Utc>) -> ModerationResult<Vec<WeeklyAward>> {
        validate_id("community id", community_id)?;
        let quiet_period = self.rewards.weekly_quiet_period();
        let spacing = self.rewards.weekly_bonus_spacing();
        let candidates: Vec<StrikeRecord> = self
            .store
            .list(community_id)
            .await?
            .into_iter()
            .filter(|r| r.weekly_bonus_due(at, quiet_period, spacing))
            .collect();

        let mut awards = Vec::with_capacity(candidates.len());
        for record in candidates {
            // eligibility is re-checked under the store's lock
            let op = LedgerOp::AwardIfQuiet {
                amount: self.rewards.weekly_bonus,
                at,
                quiet_period,
                spacing,
            };
            let update = self.apply(&record.key(), op).await?;
            if let LedgerOutcome::Awarded { amount } = update.outcome {
                awards.push(WeeklyAward {
                    user_id: update.record.user_id.clone(),
                    awarded: amount,
                    total: update.record.positive_points,
                    tier: update.record.immunity_tier,
                });
            }
        }

        info!(community = %community_id, awarded_users = awards.len(), "Weekly bonus distributed");
        Ok(awards)
    }

    /// Reset active strikes, keeping points. Returns the count that was active.
    pub async fn clear_strikes(&self, key: &MemberKey, at: DateTime<Utc>) -> ModerationResult<u32> {
        let update = self.apply(key, LedgerOp::ClearStrikes { at }).await?;
        match update.outcome {
            LedgerOutcome::Cleared { previous } => {
                info!(member = %key, cleared = previous, "Strikes cleared");
                Ok(previous)
            }
            other => Err(unexpected(key, other)),
        }
    }

    /// Drop records whose window ended more than the grace period ago and
    /// that hold no points
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> ModerationResult<u64> {
        let cutoff = now - self.policy.cleanup_grace();
        let removed = self.store.delete_expired(cutoff).await?;
        info!(removed = removed, cutoff = %cutoff, "Expired strike records cleaned up");
        Ok(removed)
    }

    pub async fn strike_status(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<StrikeStatus> {
        let record = self
            .store
            .get(key)
            .await?
            .unwrap_or_else(|| StrikeRecord::new(key, now));
        let active = record.active_count(now);
        let recent_violations = record.active_history(now).to_vec();

        Ok(StrikeStatus {
            community_id: record.community_id.clone(),
            user_id: record.user_id.clone(),
            active_strikes: active,
            window_resets_at: (active > 0).then_some(record.window_reset_at),
            positive_points: record.positive_points,
            immunity_tier: self.immunity.tier_for(record.positive_points),
            last_violation_at: record.last_violation_at,
            next_action: self.escalation.action_for(active.saturating_add(1)),
            pattern: PatternSummary::from_history(&recent_violations),
            recent_violations,
        })
    }

    pub async fn immunity_status(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<ImmunityStatus> {
        let (points, active) = match self.store.get(key).await? {
            Some(record) => (record.positive_points, record.active_count(now)),
            None => (0, 0),
        };
        Ok(self.immunity.status(points, active))
    }

    /// Members with points, highest first
    pub async fn leaderboard(&self, community_id: &str, limit: usize) -> ModerationResult<Vec<LeaderboardEntry>> {
        validate_id("community id", community_id)?;
        let mut records: Vec<StrikeRecord> = self
            .store
            .list(community_id)
            .await?
            .into_iter()
            .filter(|r| r.positive_points > 0)
            .collect();
        records.sort_by(|a, b| {
            b.positive_points
                .cmp(&a.positive_points)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        Ok(records
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, r)| LeaderboardEntry {
                rank: i + 1,
                immunity_tier: self.immunity.tier_for(r.positive_points),
                positive_points: r.positive_points,
                user_id: r.user_id,
            })
            .collect())
    }

    pub async fn summary(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<LedgerSummary> {
        validate_id("community id", community_id)?;
        let records = self.store.list(community_id).await?;

        let mut tier_distribution: BTreeMap<ImmunityTier, usize> =
            ImmunityTier::all().into_iter().map(|t| (t, 0)).collect();
        let mut violators = Vec::new();
        let mut total_active_strikes = 0u64;

        for record in &records {
            *tier_distribution
                .entry(self.immunity.tier_for(record.positive_points))
                .or_insert(0) += 1;
            let active = record.active_count(now);
            if active > 0 {
                total_active_strikes += u64::from(active);
                violators.push(ViolatorSummary {
                    user_id: record.user_id.clone(),
                    active_strikes: active,
                });
            }
        }

        violators.sort_by(|a, b| {
            b.active_strikes
                .cmp(&a.active_strikes)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        let users_with_strikes = violators.len();
        violators.truncate(TOP_VIOLATORS);

        Ok(LedgerSummary {
            tracked_users: records.len(),
            users_with_strikes,
            total_active_strikes,
            top_violators: violators,
            tier_distribution,
        })
    }
}

fn points_award(update: &LedgerUpdate) -> PointsAward {
    let (awarded, throttled) = match update.outcome {
        LedgerOutcome::Awarded { amount } => (amount, false),
        _ => (0, true),
    };
    PointsAward {
        awarded,
        total: update.record.positive_points,
        tier: update.record.immunity_tier,
        throttled,
        promoted: update.record.immunity_tier > update.previous_tier,
    }
}

fn unexpected(key: &MemberKey, outcome: LedgerOutcome) -> ModerationError {
    warn!(member = %key, outcome = ?outcome, "Store returned mismatched ledger outcome");
    ModerationError::LedgerUnavailable(format!("store returned {outcome:?} for {key}"))
}
