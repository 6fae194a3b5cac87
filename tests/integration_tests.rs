//! Integration tests for the moderation engine
//!
//! These tests drive the full decision pipeline (whitelist, analyzers,
//! immunity, strike ledger) against the in-memory store, with stub
//! analyzers standing in for the remote APIs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use modguard::database::{MemoryStore, StrikeStore, WhitelistStore};
use modguard::reputation::{ImmunityThresholds, LedgerOp, LedgerUpdate, ViolationPattern};
use modguard::toxicity::AnalyzerError;
use modguard::{
    AppConfig, EngineConfig, EnforcementAction, EscalationTable, ImmunityTier, IncomingMessage,
    MemberKey, ModerationEngine, ModerationError, Severity, StoreError, StrikeRecord,
    ToxicityAnalyzer, ToxicityScore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

const COMMUNITY: &str = "guild-1";
const BENIGN: &str = "see you all at the meetup tomorrow";
const LONG_BENIGN: &str = "Thanks everyone for the review, I pushed the fixes and the CI run is green now.";

/// Remote analyzer stand-in returning a fixed toxicity score
struct StubAnalyzer {
    name: &'static str,
    toxicity: f64,
    calls: AtomicUsize,
}

impl StubAnalyzer {
    fn new(name: &'static str, toxicity: f64) -> Arc<Self> {
        Arc::new(Self {
            name,
            toxicity,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToxicityAnalyzer for StubAnalyzer {
    fn name(&self) -> &str {
        self.name
    }

    async fn score(&self, _text: &str) -> Result<ToxicityScore, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToxicityScore::from_categories(self.name, [("toxicity", self.toxicity)]))
    }
}

/// Analyzer that never answers within the engine deadline
struct HangingAnalyzer;

#[async_trait]
impl ToxicityAnalyzer for HangingAnalyzer {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn score(&self, _text: &str) -> Result<ToxicityScore, AnalyzerError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(ToxicityScore::from_categories("hanging", [("toxicity", 0.99)]))
    }
}

/// Strike store whose backend is down
struct UnreachableStore;

#[async_trait]
impl StrikeStore for UnreachableStore {
    async fn get(&self, key: &MemberKey) -> Result<Option<StrikeRecord>, StoreError> {
        Err(StoreError::Corrupt {
            key: key.to_string(),
            detail: "connection refused".to_string(),
        })
    }

    async fn apply(
        &self,
        key: &MemberKey,
        _op: &LedgerOp,
        _tiers: &ImmunityThresholds,
    ) -> Result<LedgerUpdate, StoreError> {
        Err(StoreError::Corrupt {
            key: key.to_string(),
            detail: "connection refused".to_string(),
        })
    }

    async fn list(&self, _community_id: &str) -> Result<Vec<StrikeRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_expired(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 20, 0, 0).unwrap()
}

fn engine_with(analyzers: Vec<Arc<dyn ToxicityAnalyzer>>, timeout_ms: u64) -> ModerationEngine {
    let store = Arc::new(MemoryStore::new());
    let strikes: Arc<dyn StrikeStore> = store.clone();
    let whitelist: Arc<dyn WhitelistStore> = store;
    ModerationEngine::new(
        EngineConfig::default(),
        analyzers,
        std::time::Duration::from_millis(timeout_ms),
        strikes,
        whitelist,
    )
    .unwrap()
}

/// Engine whose only remote analyzer always reports `toxicity`
fn scoring_engine(toxicity: f64) -> ModerationEngine {
    engine_with(vec![StubAnalyzer::new("stub", toxicity)], 500)
}

fn message(user: &str, content: &str) -> IncomingMessage {
    IncomingMessage {
        community_id: COMMUNITY.to_string(),
        user_id: user.to_string(),
        content: content.to_string(),
        message_id: None,
    }
}

fn member(user: &str) -> MemberKey {
    MemberKey::new(COMMUNITY, user).unwrap()
}

// ============================================================================
// Decision Scenarios
// ============================================================================

#[tokio::test]
async fn test_first_severe_violation_warns() {
    let engine = scoring_engine(0.85);
    let decision = engine.evaluate(&message("alice", BENIGN), t0()).await.unwrap();

    assert_eq!(decision.raw_severity, Severity::Severe);
    assert_eq!(decision.severity, Severity::Severe);
    assert_eq!(decision.immunity_tier, ImmunityTier::None);
    assert!(!decision.immunity_suppressed);
    assert_eq!(decision.action, EnforcementAction::Warn);
    assert_eq!(decision.strike_count, Some(1));
    assert!(decision.delete_message);
    assert_eq!(decision.dominant_category.as_deref(), Some("toxicity"));
}

#[tokio::test]
async fn test_escalation_saturates_at_kick() {
    let engine = scoring_engine(0.85);
    let expected = [
        EnforcementAction::Warn,
        EnforcementAction::Timeout { minutes: 15 },
        EnforcementAction::Timeout { minutes: 60 },
        EnforcementAction::Timeout { minutes: 240 },
        EnforcementAction::Kick,
        EnforcementAction::Kick,
        EnforcementAction::Kick,
    ];

    for (i, action) in expected.iter().enumerate() {
        let at = t0() + Duration::minutes(i as i64);
        let decision = engine.evaluate(&message("bob", BENIGN), at).await.unwrap();
        assert_eq!(decision.strike_count, Some(i as u32 + 1));
        assert_eq!(&decision.action, action, "violation {}", i + 1);
    }
}

#[tokio::test]
async fn test_veteran_immunity_suppresses_mid_severity() {
    let engine = scoring_engine(0.55);
    let key = member("carol");
    engine.grant_points(&key, 600, t0()).await.unwrap();

    let decision = engine.evaluate(&message("carol", BENIGN), t0()).await.unwrap();

    assert_eq!(decision.immunity_tier, ImmunityTier::Veteran);
    assert!(decision.immunity_suppressed);
    assert_ne!(decision.raw_severity, Severity::None);
    assert_eq!(decision.severity, Severity::None);
    assert_eq!(decision.action, EnforcementAction::None);
    assert_eq!(decision.strike_count, None);
    assert!(decision.reason.contains("suppressed by veteran immunity"));

    let status = engine.strike_status(&key, t0()).await.unwrap();
    assert_eq!(status.active_strikes, 0);
    assert_eq!(status.positive_points, 600);
}

#[tokio::test]
async fn test_severe_never_suppressed_for_guardian() {
    let engine = scoring_engine(0.9);
    let key = member("dana");
    engine.grant_points(&key, 5_000, t0()).await.unwrap();

    let decision = engine.evaluate(&message("dana", BENIGN), t0()).await.unwrap();

    assert_eq!(decision.severity, Severity::Severe);
    assert!(!decision.immunity_suppressed);
    assert_eq!(decision.action, EnforcementAction::Warn);
    // penalty still applies to a guardian
    let status = engine.immunity_status(&key, t0()).await.unwrap();
    assert_eq!(status.points, 4_990);
}

#[tokio::test]
async fn test_whitelisted_member_skips_analysis() {
    let stub = StubAnalyzer::new("stub", 0.95);
    let engine = engine_with(vec![stub.clone()], 500);
    let key = member("bot");
    engine
        .whitelist_add(&key, Some("relay bot".to_string()), "mod-1", None, t0())
        .await
        .unwrap();

    let decision = engine.evaluate(&message("bot", BENIGN), t0()).await.unwrap();

    assert!(decision.whitelisted);
    assert_eq!(decision.action, EnforcementAction::None);
    assert_eq!(decision.reason, "whitelisted");
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_timed_out_analyzers_fall_back_to_patterns() {
    let engine = engine_with(vec![Arc::new(HangingAnalyzer)], 50);

    let decision = engine.evaluate(&message("eve", "just kys already"), t0()).await.unwrap();

    assert_eq!(decision.sources, vec!["patterns".to_string()]);
    assert_eq!(decision.unavailable, vec!["hanging".to_string()]);
    assert_eq!(decision.severity, Severity::Severe);
    assert_eq!(decision.action, EnforcementAction::Warn);

    let clean = engine.evaluate(&message("eve", BENIGN), t0()).await.unwrap();
    assert_eq!(clean.severity, Severity::None);
}

#[tokio::test]
async fn test_highest_analyzer_wins() {
    let engine = engine_with(
        vec![StubAnalyzer::new("low", 0.1), StubAnalyzer::new("high", 0.65)],
        500,
    );
    let decision = engine.evaluate(&message("finn", BENIGN), t0()).await.unwrap();

    assert_eq!(decision.severity, Severity::Moderate);
    assert!((decision.overall_score - 0.65).abs() < 1e-9);
    assert!(decision.delete_message);
}

#[tokio::test]
async fn test_mild_violation_keeps_message() {
    let engine = scoring_engine(0.45);
    let decision = engine.evaluate(&message("gail", BENIGN), t0()).await.unwrap();

    assert_eq!(decision.severity, Severity::Mild);
    assert_eq!(decision.action, EnforcementAction::Warn);
    assert!(!decision.delete_message);
}

#[tokio::test]
async fn test_ledger_unavailable_is_surfaced() {
    let store = Arc::new(MemoryStore::new());
    let whitelist: Arc<dyn WhitelistStore> = store;
    let engine = ModerationEngine::new(
        EngineConfig::default(),
        vec![StubAnalyzer::new("stub", 0.9)],
        std::time::Duration::from_millis(500),
        Arc::new(UnreachableStore),
        whitelist,
    )
    .unwrap();

    let result = engine.evaluate(&message("hank", BENIGN), t0()).await;
    assert!(matches!(result, Err(ModerationError::LedgerUnavailable(_))));
}

// ============================================================================
// Strike Window
// ============================================================================

#[tokio::test]
async fn test_window_resets_exactly_at_boundary() {
    let engine = scoring_engine(0.85);

    let first = engine.evaluate(&message("ivan", BENIGN), t0()).await.unwrap();
    assert_eq!(first.strike_count, Some(1));

    let just_before = t0() + Duration::minutes(60) - Duration::seconds(1);
    let second = engine.evaluate(&message("ivan", BENIGN), just_before).await.unwrap();
    assert_eq!(second.strike_count, Some(2));

    let at_reset = t0() + Duration::minutes(60);
    let status = engine.strike_status(&member("ivan"), at_reset).await.unwrap();
    assert_eq!(status.active_strikes, 0);
    assert_eq!(status.next_action, EnforcementAction::Warn);

    let third = engine.evaluate(&message("ivan", BENIGN), at_reset).await.unwrap();
    assert_eq!(third.strike_count, Some(1));
    assert_eq!(third.action, EnforcementAction::Warn);
}

#[tokio::test]
async fn test_concurrent_violations_are_counted_once_each() {
    let engine = Arc::new(scoring_engine(0.85));
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evaluate(&message("jade", BENIGN), t0()).await })
        })
        .collect();

    let mut counts = Vec::new();
    for handle in handles {
        counts.push(handle.await.unwrap().unwrap().strike_count.unwrap());
    }
    counts.sort_unstable();

    assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
    let status = engine.strike_status(&member("jade"), t0()).await.unwrap();
    assert_eq!(status.active_strikes, 20);
}

// ============================================================================
// Points and Immunity
// ============================================================================

#[tokio::test]
async fn test_clean_message_award_is_throttled() {
    let engine = scoring_engine(0.0);

    let first = engine.evaluate(&message("kim", LONG_BENIGN), t0()).await.unwrap();
    assert_eq!(first.points_awarded, Some(6));

    let throttled = engine
        .evaluate(&message("kim", LONG_BENIGN), t0() + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(throttled.points_awarded, None);

    let later = engine
        .evaluate(&message("kim", "ok"), t0() + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(later.points_awarded, Some(1));

    let status = engine.immunity_status(&member("kim"), t0()).await.unwrap();
    assert_eq!(status.points, 7);
}

#[tokio::test]
async fn test_empty_message_earns_nothing() {
    let engine = scoring_engine(0.0);
    let decision = engine.evaluate(&message("lou", " \u{200b} "), t0()).await.unwrap();

    assert_eq!(decision.action, EnforcementAction::None);
    assert_eq!(decision.points_awarded, None);
}

#[tokio::test]
async fn test_penalty_can_demote_tier() {
    let engine = scoring_engine(0.85);
    let key = member("max");
    let award = engine.grant_points(&key, 105, t0()).await.unwrap();
    assert_eq!(award.tier, ImmunityTier::Trusted);
    assert!(award.promoted);

    let decision = engine.evaluate(&message("max", BENIGN), t0()).await.unwrap();
    assert_eq!(decision.immunity_tier, ImmunityTier::None);

    let status = engine.immunity_status(&key, t0()).await.unwrap();
    assert_eq!(status.points, 95);
    assert_eq!(status.next_threshold, Some(100));
}

#[tokio::test]
async fn test_admin_grant_validation() {
    let engine = scoring_engine(0.0);
    let result = engine.grant_points(&member("ned"), 0, t0()).await;
    assert!(matches!(result, Err(ModerationError::Validation(_))));
}

#[tokio::test]
async fn test_weekly_bonus_skips_recent_violators() {
    let engine = scoring_engine(0.85);
    let quiet = member("olga");
    let noisy = member("pete");

    engine.grant_points(&quiet, 20, t0() - Duration::days(10)).await.unwrap();
    engine
        .evaluate(&message("pete", BENIGN), t0() - Duration::days(2))
        .await
        .unwrap();
    // throttle does not apply to the bonus
    engine.grant_points(&quiet, 5, t0()).await.unwrap();

    let awards = engine.award_weekly_bonus(COMMUNITY, t0()).await.unwrap();

    assert_eq!(awards.len(), 1);
    assert_eq!(awards[0].user_id, "olga");
    assert_eq!(awards[0].awarded, 50);
    assert_eq!(awards[0].total, 75);

    let noisy_status = engine.immunity_status(&noisy, t0()).await.unwrap();
    assert_eq!(noisy_status.points, 0);
}

#[tokio::test]
async fn test_weekly_bonus_paid_once_when_rerun() {
    let engine = scoring_engine(0.0);
    let key = member("rosa");
    engine.grant_points(&key, 20, t0() - Duration::days(10)).await.unwrap();

    let first = engine.award_weekly_bonus(COMMUNITY, t0()).await.unwrap();
    let rerun = engine
        .award_weekly_bonus(COMMUNITY, t0() + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(first.len(), 1);
    assert!(rerun.is_empty());
    assert_eq!(engine.immunity_status(&key, t0()).await.unwrap().points, 70);
}

#[tokio::test]
async fn test_strike_status_reports_violation_pattern() {
    let engine = scoring_engine(0.85);
    let key = member("sam");
    engine.evaluate(&message("sam", BENIGN), t0()).await.unwrap();
    engine
        .evaluate(&message("sam", BENIGN), t0() + Duration::minutes(3))
        .await
        .unwrap();

    let status = engine.strike_status(&key, t0() + Duration::minutes(4)).await.unwrap();
    assert_eq!(status.recent_violations.len(), 2);
    assert!(status
        .recent_violations
        .iter()
        .all(|v| v.severity == Severity::Severe && v.category.as_deref() == Some("toxicity")));
    assert_eq!(status.pattern.pattern, ViolationPattern::Dangerous);
    assert_eq!(status.pattern.severity_counts.get(&Severity::Severe), Some(&2));
}

#[tokio::test]
async fn test_clear_strikes_keeps_points() {
    let engine = scoring_engine(0.85);
    let key = member("quinn");
    engine.grant_points(&key, 300, t0()).await.unwrap();
    engine.evaluate(&message("quinn", BENIGN), t0()).await.unwrap();
    engine.evaluate(&message("quinn", BENIGN), t0()).await.unwrap();

    let cleared = engine.clear_strikes(&key, t0()).await.unwrap();
    assert_eq!(cleared, 2);

    let status = engine.strike_status(&key, t0()).await.unwrap();
    assert_eq!(status.active_strikes, 0);
    assert_eq!(status.positive_points, 280);

    let next = engine.evaluate(&message("quinn", BENIGN), t0()).await.unwrap();
    assert_eq!(next.strike_count, Some(1));
}

#[tokio::test]
async fn test_cleanup_removes_only_idle_pointless_records() {
    let engine = scoring_engine(0.85);
    engine.evaluate(&message("rita", BENIGN), t0()).await.unwrap();
    engine.grant_points(&member("sam"), 40, t0()).await.unwrap();
    engine.evaluate(&message("sam", BENIGN), t0()).await.unwrap();

    let too_early = t0() + Duration::hours(2);
    assert_eq!(engine.cleanup_expired(too_early).await.unwrap(), 0);

    let after_grace = t0() + Duration::hours(26);
    assert_eq!(engine.cleanup_expired(after_grace).await.unwrap(), 1);

    let sam = engine.immunity_status(&member("sam"), after_grace).await.unwrap();
    assert_eq!(sam.points, 30);
}

#[tokio::test]
async fn test_leaderboard_and_stats() {
    let engine = scoring_engine(0.85);
    engine.grant_points(&member("a1"), 1_200, t0()).await.unwrap();
    engine.grant_points(&member("a2"), 150, t0()).await.unwrap();
    engine.evaluate(&message("a3", BENIGN), t0()).await.unwrap();
    engine
        .whitelist_add(&member("bot"), None, "mod-1", None, t0())
        .await
        .unwrap();

    let board = engine.leaderboard(COMMUNITY, 10).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].user_id, "a1");
    assert_eq!(board[0].immunity_tier, ImmunityTier::Guardian);
    assert_eq!(board[1].rank, 2);

    let stats = engine.community_stats(COMMUNITY, t0()).await.unwrap();
    assert_eq!(stats.ledger.tracked_users, 3);
    assert_eq!(stats.ledger.users_with_strikes, 1);
    assert_eq!(stats.ledger.total_active_strikes, 1);
    assert_eq!(stats.whitelisted_users, 1);
    assert_eq!(stats.ledger.tier_distribution[&ImmunityTier::Guardian], 1);
}

// ============================================================================
// Whitelist
// ============================================================================

#[tokio::test]
async fn test_whitelist_expiry_boundary() {
    let stub = StubAnalyzer::new("stub", 0.9);
    let engine = engine_with(vec![stub.clone()], 500);
    let expiry = t0() + Duration::hours(1);
    engine
        .whitelist_add(&member("tess"), None, "mod-1", Some(expiry), t0())
        .await
        .unwrap();

    let before = engine
        .evaluate(&message("tess", BENIGN), expiry - Duration::seconds(1))
        .await
        .unwrap();
    assert!(before.whitelisted);

    let at_expiry = engine.evaluate(&message("tess", BENIGN), expiry).await.unwrap();
    assert!(!at_expiry.whitelisted);
    assert_eq!(at_expiry.action, EnforcementAction::Warn);
    assert_eq!(stub.calls(), 1);

    assert!(engine.whitelist_list(COMMUNITY, expiry).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_whitelist_rejects_past_expiry() {
    let engine = scoring_engine(0.0);
    let result = engine
        .whitelist_add(&member("uma"), None, "mod-1", Some(t0() - Duration::minutes(1)), t0())
        .await;
    assert!(matches!(result, Err(ModerationError::Validation(_))));
}

#[tokio::test]
async fn test_whitelist_replace_and_remove() {
    let engine = scoring_engine(0.0);
    let key = member("vic");

    let first = engine.whitelist_add(&key, None, "mod-1", None, t0()).await.unwrap();
    assert!(first.inserted);
    let second = engine
        .whitelist_add(&key, Some("moved to staff".to_string()), "mod-2", None, t0())
        .await
        .unwrap();
    assert!(!second.inserted);

    assert!(engine.whitelist_remove(&key).await.unwrap());
    assert!(!engine.whitelist_remove(&key).await.unwrap());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_engine_rejects_invalid_configuration() {
    let build = |config: EngineConfig| {
        let store = Arc::new(MemoryStore::new());
        let strikes: Arc<dyn StrikeStore> = store.clone();
        let whitelist: Arc<dyn WhitelistStore> = store;
        ModerationEngine::new(config, Vec::new(), std::time::Duration::from_millis(100), strikes, whitelist)
    };

    let mut unordered = EngineConfig::default();
    unordered.immunity.veteran = 50;
    assert!(matches!(build(unordered), Err(ModerationError::Config(_))));

    let mut zero_window = EngineConfig::default();
    zero_window.ledger.window_minutes = 0;
    assert!(matches!(build(zero_window), Err(ModerationError::Config(_))));

    assert!(EscalationTable::parse("").is_err());
    assert!(EscalationTable::parse("warn,none,kick").is_err());

    let mut custom = EngineConfig::default();
    custom.escalation = EscalationTable::parse("delete_and_warn,timeout:30,kick").unwrap();
    assert!(build(custom).is_ok());
}

#[test]
fn test_app_config_requires_keys_when_auth_enabled() {
    let mut config = AppConfig::default();
    assert!(config.validate().is_err());

    config.security.api_keys = vec!["short".to_string()];
    assert!(config.validate().is_err());

    config.security.api_keys = vec!["k".repeat(32)];
    assert!(config.validate().is_ok());

    config.analyzers.openai_api_key = Some("sk-test".to_string());
    config.analyzers.openai_endpoint = "http://localhost:8080/v1/moderations".to_string();
    assert!(config.validate().is_err());
}
