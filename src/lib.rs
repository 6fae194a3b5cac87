//! modguard - chat moderation decision engine
//!
//! Turns each inbound community message into a decision: whitelist check,
//! toxicity scoring across several analyzers, immunity bypass for members
//! with a good record, then a strike and an escalating action.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs        - Crate root with re-exports
//! ├── main.rs       - Server entrypoint
//! ├── config.rs     - Environment configuration and validation
//! ├── error.rs      - Error kinds
//! ├── engine.rs     - Per-message decision pipeline
//! ├── whitelist.rs  - Exempt members
//! ├── toxicity/     - Analyzers and score aggregation
//! │   ├── patterns.rs    - Local regex analyzer (always available)
//! │   ├── perspective.rs - Perspective API analyzer
//! │   ├── openai.rs      - OpenAI moderation analyzer
//! │   └── aggregator.rs  - Concurrent fan-out with deadlines
//! ├── reputation/   - Strike ledger and immunity tiers
//! │   ├── record.rs     - Strike record and its transitions
//! │   ├── immunity.rs   - Points to tier, severity bypass
//! │   ├── escalation.rs - Strike count to action
//! │   └── ledger.rs     - Ledger orchestrator
//! ├── api/          - HTTP API and security middleware
//! └── database/     - In-memory and PostgreSQL stores
//! ```

pub mod api;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod reputation;
pub mod toxicity;
pub mod whitelist;

pub use config::{AppConfig, EngineConfig};
pub use database::{DatabasePool, MemoryStore, StrikeStore, WhitelistStore};
pub use engine::{CommunityStats, Decision, IncomingMessage, ModerationEngine};
pub use error::{ModerationError, ModerationResult, StoreError};
pub use reputation::{
    EnforcementAction, EscalationTable, ImmunityEvaluator, ImmunityStatus, ImmunityThresholds,
    ImmunityTier, LedgerPolicy, MemberKey, RewardPolicy, StrikeLedger, StrikeRecord, StrikeStatus,
};
pub use toxicity::{
    Assessment, Severity, SeverityThresholds, ToxicityAggregator, ToxicityAnalyzer, ToxicityScore,
};
pub use whitelist::{WhitelistEntry, WhitelistGuard};
