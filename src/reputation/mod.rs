//! Strike ledger and immunity system
//!
//! Tracks each member's violations inside a rolling window and the positive
//! points they earn for good behaviour. Points buy immunity tiers that can
//! absorb milder violations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ ImmunityEvaluator│◄────│  StrikeLedger    │────►│ EscalationTable  │
//! │ (points → tier)  │     │  (orchestrator)  │     │ (count → action) │
//! └──────────────────┘     └──────────────────┘     └──────────────────┘
//!                                   │ LedgerOp
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │ StrikeStore      │
//!                          │ (atomic apply)   │
//!                          └──────────────────┘
//! ```
//!
//! ## Record Model
//!
//! - Violation count resets lazily once the window has elapsed
//! - Each violation costs points (floored at zero)
//! - Points are never reset by a strike window rollover or by clearing
//! - The last `HISTORY_LIMIT` violations of the window are kept for pattern analysis

mod escalation;
mod immunity;
mod ledger;
mod record;

pub use escalation::{EnforcementAction, EscalationTable};
pub use immunity::{BypassOutcome, ImmunityEvaluator, ImmunityStatus, ImmunityThresholds, ImmunityTier};
pub use ledger::{
    LeaderboardEntry, LedgerSummary, PointsAward, StrikeLedger, StrikeStatus, ViolationOutcome,
    ViolatorSummary, WeeklyAward,
};
pub use record::{
    validate_id, LedgerOp, LedgerOutcome, LedgerPolicy, LedgerUpdate, MemberKey, PatternSummary,
    RewardPolicy, StrikeRecord, ViolationEntry, ViolationPattern, HISTORY_LIMIT, MAX_ID_LEN,
};
