use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::info;

use crate::models::EligibilityContext;

/// Rolling-window lengths used by the aggregator, in days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub short_days: i64,
    pub medium_days: i64,
    pub long_days: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            short_days: 90,
            medium_days: 180,
            long_days: 365,
        }
    }
}

/// One rung of the trust-level ladder. A subject reaches `level` when, inside
/// the trailing `window_days`, it has at least `min_negative_events` qualifying
/// negative events spread across at least `min_distinct_counterparties`
/// distinct related entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelRule {
    pub level: i16,
    pub window_days: i64,
    pub min_negative_events: u32,
    pub min_distinct_counterparties: u32,
}

/// Static per-level policy applied by the eligibility gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelPolicy {
    pub level: i16,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub required_actions: Vec<String>,
    #[serde(default)]
    pub blocked_contexts: Vec<EligibilityContext>,
}

/// Complete engine policy. Thresholds are deployment configuration, not law:
/// defaults mirror the marketplace's launch policy and any field can be
/// overridden via the JSON file named by `TRUST_POLICY_PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    pub windows: WindowConfig,
    pub levels: Vec<LevelRule>,
    /// Uninterrupted completions required for a one-level demotion.
    pub recovery_threshold: u32,
    /// Maximum age of the latest snapshot before the sweep writes a scheduled one.
    pub snapshot_interval_days: i64,
    /// How often the housekeeping sweep runs.
    pub sweep_interval_hours: i64,
    /// Tolerated clock skew for `occurred_at` timestamps from collaborators.
    pub max_future_skew_minutes: i64,
    pub eligibility: Vec<LevelPolicy>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        TrustPolicy {
            windows: WindowConfig::default(),
            levels: vec![
                LevelRule {
                    level: 1,
                    window_days: 90,
                    min_negative_events: 2,
                    min_distinct_counterparties: 1,
                },
                LevelRule {
                    level: 2,
                    window_days: 180,
                    min_negative_events: 4,
                    min_distinct_counterparties: 2,
                },
                LevelRule {
                    level: 3,
                    window_days: 180,
                    min_negative_events: 6,
                    min_distinct_counterparties: 3,
                },
            ],
            recovery_threshold: 5,
            snapshot_interval_days: 7,
            sweep_interval_hours: 24,
            max_future_skew_minutes: 15,
            eligibility: vec![
                LevelPolicy {
                    level: 1,
                    warnings: vec![
                        "Recent reliability issues were noted on your account.".to_string(),
                    ],
                    required_actions: vec![],
                    blocked_contexts: vec![],
                },
                LevelPolicy {
                    level: 2,
                    warnings: vec![
                        "Your account is flagged as a reliability risk.".to_string(),
                    ],
                    required_actions: vec![
                        "accept_no_show_fee".to_string(),
                        "confirm_attendance".to_string(),
                    ],
                    blocked_contexts: vec![],
                },
                LevelPolicy {
                    level: 3,
                    warnings: vec![
                        "Your account is restricted due to repeated reliability issues."
                            .to_string(),
                    ],
                    required_actions: vec![
                        "accept_no_show_fee".to_string(),
                        "confirm_attendance".to_string(),
                    ],
                    blocked_contexts: vec![EligibilityContext::HighUrgencyJob],
                },
            ],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

impl TrustPolicy {
    /// Load the policy from `TRUST_POLICY_PATH` if set, otherwise use defaults.
    pub fn from_env() -> Result<Self, PolicyError> {
        let policy = match env::var("TRUST_POLICY_PATH") {
            Ok(path) => {
                info!(path = %path, "Loading trust policy from file");
                Self::from_file(&path)?
            }
            Err(_) => TrustPolicy::default(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reject policies that would violate the engine's invariants before any
    /// subject can be scored against them.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.levels.is_empty() {
            return Err(PolicyError::Invalid("at least one level rule required".into()));
        }
        let mut prev_level = 0i16;
        for rule in &self.levels {
            if rule.level <= prev_level || rule.level > 3 {
                return Err(PolicyError::Invalid(format!(
                    "level rules must be ascending within 1..=3, got level {}",
                    rule.level
                )));
            }
            // A single event must never raise the level.
            if rule.min_negative_events < 2 {
                return Err(PolicyError::Invalid(format!(
                    "level {} rule requires fewer than 2 events",
                    rule.level
                )));
            }
            if rule.window_days <= 0 {
                return Err(PolicyError::Invalid(format!(
                    "level {} rule has non-positive window",
                    rule.level
                )));
            }
            if rule.min_distinct_counterparties == 0 {
                return Err(PolicyError::Invalid(format!(
                    "level {} rule requires at least 1 distinct counterparty",
                    rule.level
                )));
            }
            prev_level = rule.level;
        }
        if self.recovery_threshold == 0 {
            return Err(PolicyError::Invalid("recovery_threshold must be positive".into()));
        }
        for policy in &self.eligibility {
            if policy.level <= 1 && !policy.blocked_contexts.is_empty() {
                return Err(PolicyError::Invalid(format!(
                    "level {} policy may not block any context",
                    policy.level
                )));
            }
        }
        Ok(())
    }

    /// Policy entry for a given level, if one is configured.
    pub fn policy_for_level(&self, level: i16) -> Option<&LevelPolicy> {
        self.eligibility.iter().find(|p| p.level == level)
    }
}
