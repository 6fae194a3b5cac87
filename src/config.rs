use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::error::ModerationResult;
use crate::reputation::{EscalationTable, ImmunityThresholds, LedgerPolicy, RewardPolicy};
use crate::toxicity::{SeverityThresholds, DEFAULT_OPENAI_ENDPOINT, DEFAULT_PERSPECTIVE_ENDPOINT};

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Remote toxicity analyzers
    pub analyzers: AnalyzerConfig,
    /// Decision engine tuning
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enable API authentication
    pub enable_auth: bool,
    /// Accepted API keys (MODGUARD_API_KEYS, comma-separated)
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    /// Rate limit per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    #[serde(skip_serializing)]
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory store)
    pub postgres_enabled: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Mask client addresses in request logs
    pub sanitize_logs: bool,
    /// Enable request/response logging
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Perspective API key; the analyzer is skipped when unset
    #[serde(skip_serializing)]
    pub perspective_api_key: Option<String>,
    pub perspective_endpoint: String,
    /// OpenAI API key; the analyzer is skipped when unset
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_endpoint: String,
    /// Deadline for each analyzer call
    pub timeout_ms: u64,
    /// Refuse plain-HTTP analyzer endpoints
    pub require_https: bool,
}

/// Everything the decision engine needs, immutable once built
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub toxicity: SeverityThresholds,
    pub immunity: ImmunityThresholds,
    pub ledger: LedgerPolicy,
    pub rewards: RewardPolicy,
    pub escalation: EscalationTable,
}

impl EngineConfig {
    pub fn validate(&self) -> ModerationResult<()> {
        self.toxicity.validate()?;
        self.immunity.validate()?;
        self.ledger.validate()?;
        self.rewards.validate()?;
        self.escalation.validate()?;
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: Vec::new(),
            rate_limit_per_minute: 600,
            max_request_size: 64 * 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/modguard".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            sanitize_logs: true,
            log_requests: false, // Disabled by default for privacy
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            perspective_api_key: None,
            perspective_endpoint: DEFAULT_PERSPECTIVE_ENDPOINT.to_string(),
            openai_api_key: None,
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            timeout_ms: 2_000,
            require_https: true,
        }
    }
}

/// Parse `name` from the environment if it is set
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {name} value"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server configuration
        if let Some(host) = non_empty_var("MODGUARD_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var("MODGUARD_PORT")? {
            config.server.port = port;
        }

        // Security configuration
        if let Some(enable_auth) = parse_var("MODGUARD_ENABLE_AUTH")? {
            config.security.enable_auth = enable_auth;
        }
        if let Some(keys) = non_empty_var("MODGUARD_API_KEYS") {
            config.security.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(limit) = parse_var("MODGUARD_RATE_LIMIT_PER_MINUTE")? {
            config.security.rate_limit_per_minute = limit;
        }
        if let Some(size) = parse_var("MODGUARD_MAX_REQUEST_SIZE")? {
            config.security.max_request_size = size;
        }

        // Database configuration
        if let Some(url) = non_empty_var("MODGUARD_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Some(enabled) = parse_var("MODGUARD_POSTGRES_ENABLED")? {
            config.database.postgres_enabled = enabled;
        }
        if let Some(max) = parse_var("MODGUARD_POSTGRES_MAX_CONNECTIONS")? {
            config.database.max_connections = max;
        }

        // Logging configuration
        if let Some(level) = non_empty_var("MODGUARD_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(sanitize) = parse_var("MODGUARD_SANITIZE_LOGS")? {
            config.logging.sanitize_logs = sanitize;
        }
        if let Some(log_requests) = parse_var("MODGUARD_LOG_REQUESTS")? {
            config.logging.log_requests = log_requests;
        }

        // Analyzer configuration
        config.analyzers.perspective_api_key = non_empty_var("MODGUARD_PERSPECTIVE_API_KEY");
        if let Some(endpoint) = non_empty_var("MODGUARD_PERSPECTIVE_ENDPOINT") {
            config.analyzers.perspective_endpoint = endpoint;
        }
        config.analyzers.openai_api_key = non_empty_var("MODGUARD_OPENAI_API_KEY");
        if let Some(endpoint) = non_empty_var("MODGUARD_OPENAI_ENDPOINT") {
            config.analyzers.openai_endpoint = endpoint;
        }
        if let Some(timeout) = parse_var("MODGUARD_ANALYZER_TIMEOUT_MS")? {
            config.analyzers.timeout_ms = timeout;
        }
        if let Some(require_https) = parse_var("MODGUARD_ANALYZER_REQUIRE_HTTPS")? {
            config.analyzers.require_https = require_https;
        }

        // Severity thresholds
        let toxicity = &mut config.engine.toxicity;
        if let Some(v) = parse_var("MODGUARD_SEVERE_THRESHOLD")? {
            toxicity.severe = v;
        }
        if let Some(v) = parse_var("MODGUARD_MODERATE_THRESHOLD")? {
            toxicity.moderate = v;
        }
        if let Some(v) = parse_var("MODGUARD_MILD_THRESHOLD")? {
            toxicity.mild = v;
        }

        // Immunity tiers
        let immunity = &mut config.engine.immunity;
        if let Some(v) = parse_var("MODGUARD_TRUSTED_POINTS")? {
            immunity.trusted = v;
        }
        if let Some(v) = parse_var("MODGUARD_VETERAN_POINTS")? {
            immunity.veteran = v;
        }
        if let Some(v) = parse_var("MODGUARD_GUARDIAN_POINTS")? {
            immunity.guardian = v;
        }

        // Strike ledger
        let ledger = &mut config.engine.ledger;
        if let Some(v) = parse_var("MODGUARD_STRIKE_WINDOW_MINUTES")? {
            ledger.window_minutes = v;
        }
        if let Some(v) = parse_var("MODGUARD_STRIKE_PENALTY")? {
            ledger.strike_penalty = v;
        }
        if let Some(v) = parse_var("MODGUARD_CLEANUP_GRACE_HOURS")? {
            ledger.cleanup_grace_hours = v;
        }
        if let Some(table) = non_empty_var("MODGUARD_ESCALATION") {
            config.engine.escalation =
                EscalationTable::parse(&table).context("Invalid MODGUARD_ESCALATION value")?;
        }

        // Rewards
        let rewards = &mut config.engine.rewards;
        if let Some(v) = parse_var("MODGUARD_CLEAN_THRESHOLD")? {
            rewards.clean_threshold = v;
        }
        if let Some(v) = parse_var("MODGUARD_CLEAN_POINTS")? {
            rewards.clean_points = v;
        }
        if let Some(v) = parse_var("MODGUARD_QUALITY_POINTS")? {
            rewards.quality_points = v;
        }
        if let Some(v) = parse_var("MODGUARD_QUALITY_MIN_CHARS")? {
            rewards.quality_min_chars = v;
        }
        if let Some(v) = parse_var("MODGUARD_AWARD_INTERVAL_SECS")? {
            rewards.award_interval_secs = v;
        }
        if let Some(v) = parse_var("MODGUARD_WEEKLY_BONUS")? {
            rewards.weekly_bonus = v;
        }
        if let Some(v) = parse_var("MODGUARD_WEEKLY_BONUS_SPACING_DAYS")? {
            rewards.weekly_bonus_spacing_days = v;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.security.enable_auth {
            if self.security.api_keys.is_empty() {
                return Err(anyhow::anyhow!(
                    "Authentication is enabled but MODGUARD_API_KEYS is empty"
                ));
            }
            if let Some(short) = self.security.api_keys.iter().find(|k| k.len() < 32) {
                return Err(anyhow::anyhow!(
                    "API key {} is too short (minimum 32 characters)",
                    sanitize_for_logging(short)
                ));
            }
        } else {
            warn!("API authentication disabled - admin routes are open");
        }

        if self.security.rate_limit_per_minute == 0 {
            return Err(anyhow::anyhow!("Rate limit must be non-zero"));
        }

        if self.database.postgres_enabled && self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("PostgreSQL pool needs at least one connection"));
        }

        if self.analyzers.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Analyzer timeout must be non-zero"));
        }

        if self.analyzers.require_https {
            for (name, endpoint, enabled) in [
                ("perspective", &self.analyzers.perspective_endpoint, self.analyzers.perspective_api_key.is_some()),
                ("openai", &self.analyzers.openai_endpoint, self.analyzers.openai_api_key.is_some()),
            ] {
                if enabled && !endpoint.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "HTTPS is required but {} endpoint is not HTTPS: {}",
                        name,
                        endpoint
                    ));
                }
            }
        }

        self.engine.validate().context("Invalid engine configuration")?;

        Ok(())
    }
}

/// Mask secrets (API keys, connection strings) for logging
pub fn sanitize_for_logging(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{head}***{tail}")
    } else {
        let keep = chars.len().min(2);
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("{head}***{tail}")
    }
}
