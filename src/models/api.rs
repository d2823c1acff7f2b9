use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::records::{EnumParseError, Role, TrustScoreRecord};

/// Inbound lifecycle notification from the booking/job subsystem, delivered at
/// the exact moment of a qualifying state transition.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleNotification {
    pub subject_id: String,
    pub role: Role,
    pub raw_kind: String,
    pub occurred_at: DateTime<Utc>,
    pub related_entity_id: String,
    #[serde(default)]
    pub exclusion_reason: Option<String>,
}

/// The submission context an eligibility check is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityContext {
    JobPosting,
    JobAcceptance,
    HighUrgencyJob,
}

impl EligibilityContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityContext::JobPosting => "job_posting",
            EligibilityContext::JobAcceptance => "job_acceptance",
            EligibilityContext::HighUrgencyJob => "high_urgency_job",
        }
    }
}

impl FromStr for EligibilityContext {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_posting" => Ok(EligibilityContext::JobPosting),
            "job_acceptance" => Ok(EligibilityContext::JobAcceptance),
            "high_urgency_job" => Ok(EligibilityContext::HighUrgencyJob),
            other => Err(EnumParseError {
                field: "context",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EligibilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress toward the next automatic level decrease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryProgress {
    /// Current uninterrupted completion streak.
    pub current: u32,
    /// Streak length required for a one-level demotion.
    pub needed: u32,
    /// False at level 0, where there is nothing to recover from.
    pub applies: bool,
}

/// Windowed counters as exposed to status consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSet {
    pub negative_events_short: i32,
    pub negative_events_medium: i32,
    pub negative_events_long: i32,
    pub distinct_counterparties: i32,
    pub total_completions: i32,
    pub recent_completions: i32,
}

impl CounterSet {
    pub fn from_record(record: &TrustScoreRecord) -> Self {
        CounterSet {
            negative_events_short: record.negative_events_short,
            negative_events_medium: record.negative_events_medium,
            negative_events_long: record.negative_events_long,
            distinct_counterparties: record.distinct_counterparties,
            total_completions: record.total_completions,
            recent_completions: record.recent_completions,
        }
    }
}

/// `getTrustStatus` response, consumed by profile/dashboard UI.
#[derive(Debug, Clone, Serialize)]
pub struct TrustStatusResponse {
    pub subject_id: String,
    pub role: Role,
    pub level: i16,
    pub counters: CounterSet,
    pub recovery_progress: RecoveryProgress,
    pub guidance: Vec<String>,
    pub last_recalculated_at: Option<DateTime<Utc>>,
}

/// `checkEligibility` response, consumed on every submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibilityDecision {
    pub eligible: bool,
    pub warnings: Vec<String>,
    pub required_actions: Vec<String>,
}

impl EligibilityDecision {
    /// Level-0 behavior: no restrictions of any kind.
    pub fn unrestricted() -> Self {
        EligibilityDecision {
            eligible: true,
            warnings: Vec::new(),
            required_actions: Vec::new(),
        }
    }
}

/// Outcome of ingesting one lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Event persisted and the subject's score recalculated.
    Recorded,
    /// Same (subject, related entity, kind) already ingested; no-op success.
    Duplicate,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub outcome: IngestOutcome,
    pub trust_level: i16,
}
