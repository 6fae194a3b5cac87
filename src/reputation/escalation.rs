//! Escalation table: strike count within the window -> enforcement action

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModerationError, ModerationResult};

/// Action the enforcement collaborator should take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnforcementAction {
    None,
    Warn,
    DeleteAndWarn,
    Timeout { minutes: u32 },
    Kick,
}

impl EnforcementAction {
    pub fn is_none(&self) -> bool {
        matches!(self, EnforcementAction::None)
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementAction::None => f.write_str("none"),
            EnforcementAction::Warn => f.write_str("warn"),
            EnforcementAction::DeleteAndWarn => f.write_str("delete_and_warn"),
            EnforcementAction::Timeout { minutes } => write!(f, "timeout:{minutes}"),
            EnforcementAction::Kick => f.write_str("kick"),
        }
    }
}

/// Parses the `Display` form: `warn`, `delete_and_warn`, `timeout:15`, `kick`
impl FromStr for EnforcementAction {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "none" => Ok(EnforcementAction::None),
            "warn" => Ok(EnforcementAction::Warn),
            "delete_and_warn" => Ok(EnforcementAction::DeleteAndWarn),
            "kick" => Ok(EnforcementAction::Kick),
            other => {
                let minutes = other
                    .strip_prefix("timeout:")
                    .and_then(|m| m.trim().parse::<u32>().ok())
                    .filter(|m| *m > 0)
                    .ok_or_else(|| {
                        ModerationError::Config(format!("unknown escalation action '{other}'"))
                    })?;
                Ok(EnforcementAction::Timeout { minutes })
            }
        }
    }
}

/// Ordered actions; entry `i` applies to strike `i + 1`, the last entry
/// repeats for every count beyond the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EnforcementAction>", into = "Vec<EnforcementAction>")]
pub struct EscalationTable(Vec<EnforcementAction>);

impl Default for EscalationTable {
    fn default() -> Self {
        Self(vec![
            EnforcementAction::Warn,
            EnforcementAction::Timeout { minutes: 15 },
            EnforcementAction::Timeout { minutes: 60 },
            EnforcementAction::Timeout { minutes: 240 },
            EnforcementAction::Kick,
        ])
    }
}

impl EscalationTable {
    pub fn new(actions: Vec<EnforcementAction>) -> ModerationResult<Self> {
        let table = Self(actions);
        table.validate()?;
        Ok(table)
    }

    /// Comma-separated list, e.g. `warn,timeout:15,timeout:60,kick`
    pub fn parse(list: &str) -> ModerationResult<Self> {
        let actions = list
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(EnforcementAction::from_str)
            .collect::<ModerationResult<Vec<_>>>()?;
        Self::new(actions)
    }

    pub fn validate(&self) -> ModerationResult<()> {
        if self.0.is_empty() {
            return Err(ModerationError::Config("escalation table must not be empty".to_string()));
        }
        if self.0.iter().any(EnforcementAction::is_none) {
            return Err(ModerationError::Config(
                "escalation table entries must be actual actions".to_string(),
            ));
        }
        Ok(())
    }

    /// Action for the `count`-th strike of a window (1-based)
    pub fn action_for(&self, count: u32) -> EnforcementAction {
        if count == 0 {
            return EnforcementAction::None;
        }
        let index = (count as usize - 1).min(self.0.len().saturating_sub(1));
        self.0.get(index).copied().unwrap_or(EnforcementAction::None)
    }

    pub fn actions(&self) -> &[EnforcementAction] {
        &self.0
    }
}

impl TryFrom<Vec<EnforcementAction>> for EscalationTable {
    type Error = ModerationError;

    fn try_from(actions: Vec<EnforcementAction>) -> Result<Self, Self::Error> {
        Self::new(actions)
    }
}

impl From<EscalationTable> for Vec<EnforcementAction> {
    fn from(table: EscalationTable) -> Self {
        table.0
    }
}

impl fmt::Display for EscalationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}
