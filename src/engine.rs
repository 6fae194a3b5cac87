//! Moderation Engine - one decision per inbound message
//!
//! ```text
//! message ─► WhitelistGuard ──exempt──► Decision(none, "whitelisted")
//!                 │
//!                 ▼
//!          ToxicityAggregator ─► ImmunityEvaluator ─► StrikeLedger ─► Decision
//! ```
//!
//! Violations record a strike and take the escalation table's action.
//! Clean messages (and violations absorbed by immunity) may earn points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::database::{StrikeStore, WhitelistStore};
use crate::error::ModerationResult;
use crate::reputation::{
    EnforcementAction, ImmunityEvaluator, ImmunityStatus, ImmunityTier, LeaderboardEntry,
    LedgerSummary, MemberKey, PointsAward, StrikeLedger, StrikeStatus, WeeklyAward,
};
use crate::toxicity::{normalize_text, Assessment, Severity, ToxicityAggregator, ToxicityAnalyzer};
use crate::whitelist::{WhitelistChange, WhitelistEntry, WhitelistGuard};

/// A chat message handed over by the platform listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub community_id: String,
    pub user_id: String,
    pub content: String,
    /// Platform message id, echoed back for the enforcement side
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Verdict for one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Audit correlation id
    pub id: Uuid,
    pub community_id: String,
    pub user_id: String,
    pub message_id: Option<String>,

    /// Severity before immunity
    pub raw_severity: Severity,
    /// Severity acted upon
    pub severity: Severity,
    pub action: EnforcementAction,
    pub delete_message: bool,
    pub reason: String,

    /// Not looked up for whitelisted members
    pub immunity_tier: ImmunityTier,
    pub immunity_suppressed: bool,
    pub whitelisted: bool,

    /// Strike count in the window, set when a strike was recorded
    pub strike_count: Option<u32>,
    /// Points added by this message, unset when nothing was awarded
    pub points_awarded: Option<u64>,

    pub overall_score: f64,
    pub dominant_category: Option<String>,
    pub sources: Vec<String>,
    pub unavailable: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    fn base(message: &IncomingMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            community_id: message.community_id.clone(),
            user_id: message.user_id.clone(),
            message_id: message.message_id.clone(),
            raw_severity: Severity::None,
            severity: Severity::None,
            action: EnforcementAction::None,
            delete_message: false,
            reason: String::new(),
            immunity_tier: ImmunityTier::None,
            immunity_suppressed: false,
            whitelisted: false,
            strike_count: None,
            points_awarded: None,
            overall_score: 0.0,
            dominant_category: None,
            sources: Vec::new(),
            unavailable: Vec::new(),
            decided_at: now,
        }
    }

    fn with_assessment(mut self, assessment: &Assessment) -> Self {
        self.raw_severity = assessment.severity;
        self.severity = assessment.severity;
        self.overall_score = assessment.overall();
        self.dominant_category = assessment
            .score
            .dominant_category()
            .map(|(category, _)| category.to_string());
        self.sources = assessment.sources.clone();
        self.unavailable = assessment.unavailable.clone();
        self
    }
}

/// Per-community overview for moderators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityStats {
    pub community_id: String,
    #[serde(flatten)]
    pub ledger: LedgerSummary,
    pub whitelisted_users: usize,
}

pub struct ModerationEngine {
    config: EngineConfig,
    whitelist: WhitelistGuard,
    aggregator: ToxicityAggregator,
    immunity: ImmunityEvaluator,
    ledger: StrikeLedger,
}

impl ModerationEngine {
    /// Build an engine. The pattern analyzer is always registered first;
    /// `analyzers` are appended after it.
    pub fn new(
        config: EngineConfig,
        analyzers: Vec<Arc<dyn ToxicityAnalyzer>>,
        analyzer_timeout: Duration,
        strikes: Arc<dyn StrikeStore>,
        whitelist: Arc<dyn WhitelistStore>,
    ) -> ModerationResult<Self> {
        config.validate()?;

        let aggregator = analyzers.into_iter().fold(
            ToxicityAggregator::new(config.toxicity, analyzer_timeout),
            ToxicityAggregator::with_analyzer,
        );
        let immunity = ImmunityEvaluator::new(config.immunity);
        let ledger = StrikeLedger::new(
            strikes,
            config.ledger,
            config.rewards,
            immunity.clone(),
            config.escalation.clone(),
        );

        info!(
            analyzers = ?aggregator.analyzer_names(),
            timeout_ms = analyzer_timeout.as_millis() as u64,
            escalation = %config.escalation,
            "Moderation engine ready"
        );

        Ok(Self {
            config,
            whitelist: WhitelistGuard::new(whitelist),
            aggregator,
            immunity,
            ledger,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StrikeLedger {
        &self.ledger
    }

    pub fn whitelist(&self) -> &WhitelistGuard {
        &self.whitelist
    }

    pub fn analyzer_names(&self) -> Vec<String> {
        self.aggregator.analyzer_names()
    }

    /// Decide what to do about one message
    pub async fn evaluate(&self, message: &IncomingMessage, now: DateTime<Utc>) -> ModerationResult<Decision> {
        let key = MemberKey::new(&message.community_id, &message.user_id)?;
        let mut decision = Decision::base(message, now);

        if self.whitelist.is_exempt(&key, now).await? {
            decision.whitelisted = true;
            decision.reason = "whitelisted".to_string();
            debug!(decision_id = %decision.id, member = %key, "Whitelisted member skipped");
            return Ok(decision);
        }

        let text = normalize_text(&message.content);
        let assessment = self.aggregator.assess(&text).await;
        let mut decision = decision.with_assessment(&assessment);

        // Read outside the ledger's atomic unit. A concurrent award or penalty
        // can move the tier before the violation lands; the bypass uses this
        // snapshot and the stored tier is recomputed by the transition.
        let tier = self.ledger.current_tier(&key).await?;
        let bypass = self.immunity.evaluate(tier, assessment.severity);
        decision.immunity_tier = tier;
        decision.immunity_suppressed = bypass.suppressed;
        decision.severity = bypass.effective;

        if bypass.effective == Severity::None {
            let award = if text.is_empty() {
                None
            } else {
                self.ledger
                    .award_message_points(&key, assessment.overall(), text.chars().count(), now)
                    .await?
            };
            decision.points_awarded = award.as_ref().filter(|a| a.awarded > 0).map(|a| a.awarded);
            if let Some(award) = &award {
                decision.immunity_tier = award.tier;
            }

            decision.reason = if bypass.suppressed {
                format!("{} severity suppressed by {} immunity", bypass.raw, tier)
            } else {
                "clean".to_string()
            };

            debug!(
                decision_id = %decision.id,
                member = %key,
                raw_severity = %bypass.raw,
                suppressed = bypass.suppressed,
                overall = decision.overall_score,
                points_awarded = ?decision.points_awarded,
                "Message allowed"
            );
            return Ok(decision);
        }

        let violation = self
            .ledger
            .record_violation(&key, bypass.effective, decision.dominant_category.as_deref(), now)
            .await?;
        decision.strike_count = Some(violation.count);
        decision.action = violation.action;
        decision.delete_message = bypass.effective >= Severity::Moderate;
        decision.immunity_tier = violation.record.immunity_tier;
        decision.reason = format!(
            "{} toxicity ({} {:.2}), strike {} in window",
            bypass.effective,
            decision.dominant_category.as_deref().unwrap_or("unknown"),
            decision.overall_score,
            violation.count
        );

        if !decision.unavailable.is_empty() {
            warn!(
                decision_id = %decision.id,
                unavailable = ?decision.unavailable,
                "Violation decided with degraded analyzer coverage"
            );
        }

        info!(
            decision_id = %decision.id,
            member = %key,
            severity = %decision.severity,
            action = %decision.action,
            strike_count = violation.count,
            delete_message = decision.delete_message,
            overall = decision.overall_score,
            category = ?decision.dominant_category,
            "Violation recorded"
        );

        Ok(decision)
    }

    pub async fn strike_status(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<StrikeStatus> {
        self.ledger.strike_status(key, now).await
    }

    pub async fn clear_strikes(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<u32> {
        self.ledger.clear_strikes(key, now).await
    }

    pub async fn immunity_status(&self, key: &MemberKey, now: DateTime<Utc>) -> ModerationResult<ImmunityStatus> {
        self.ledger.immunity_status(key, now).await
    }

    pub async fn grant_points(&self, key: &MemberKey, amount: u64, now: DateTime<Utc>) -> ModerationResult<PointsAward> {
        self.ledger.grant_points(key, amount, now).await
    }

    pub async fn award_weekly_bonus(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<Vec<WeeklyAward>> {
        self.ledger.award_weekly_bonus(community_id, now).await
    }

    pub async fn leaderboard(&self, community_id: &str, limit: usize) -> ModerationResult<Vec<LeaderboardEntry>> {
        self.ledger.leaderboard(community_id, limit).await
    }

    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> ModerationResult<u64> {
        self.ledger.cleanup_expired(now).await
    }

    pub async fn community_stats(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<CommunityStats> {
        let ledger = self.ledger.summary(community_id, now).await?;
        let whitelisted_users = self.whitelist.count(community_id, now).await?;
        Ok(CommunityStats {
            community_id: community_id.to_string(),
            ledger,
            whitelisted_users,
        })
    }

    pub async fn whitelist_add(
        &self,
        key: &MemberKey,
        reason: Option<String>,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ModerationResult<WhitelistChange> {
        self.whitelist.add(key, reason, granted_by, expires_at, now).await
    }

    pub async fn whitelist_remove(&self, key: &MemberKey) -> ModerationResult<bool> {
        self.whitelist.remove(key).await
    }

    pub async fn whitelist_list(&self, community_id: &str, now: DateTime<Utc>) -> ModerationResult<Vec<WhitelistEntry>> {
        self.whitelist.list(community_id, now).await
    }
}
