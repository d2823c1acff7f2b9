use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Error returned when a stored string does not map to a closed enum variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {field} value: {value}")]
pub struct EnumParseError {
    pub field: &'static str,
    pub value: String,
}

/// The role a trust subject holds. A single user may be scored independently
/// as a customer and as a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Provider => "provider",
        }
    }
}

impl FromStr for Role {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "provider" => Ok(Role::Provider),
            other => Err(EnumParseError {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of trust-relevant event kinds. Lifecycle notifications carry a
/// free-form `raw_kind`; classification into this enum happens at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NoShow,
    LateCancellation,
    Incident,
    Completion,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NoShow => "no_show",
            EventKind::LateCancellation => "late_cancellation",
            EventKind::Incident => "incident",
            EventKind::Completion => "completion",
        }
    }

    /// Polarity is fixed per kind; it is stored denormalized for audit queries.
    pub fn polarity(&self) -> Polarity {
        match self {
            EventKind::NoShow | EventKind::LateCancellation | EventKind::Incident => {
                Polarity::Negative
            }
            EventKind::Completion => Polarity::Positive,
        }
    }
}

impl FromStr for EventKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_show" => Ok(EventKind::NoShow),
            "late_cancellation" => Ok(EventKind::LateCancellation),
            "incident" => Ok(EventKind::Incident),
            "completion" => Ok(EventKind::Completion),
            other => Err(EnumParseError {
                field: "event_kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }
}

impl FromStr for Polarity {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Polarity::Positive),
            "negative" => Ok(Polarity::Negative),
            other => Err(EnumParseError {
                field: "polarity",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable ledger entry in the trust_event table. Created once by ingestion,
/// never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct TrustEvent {
    pub id: i64,
    pub subject_id: String,
    pub role: Role,
    pub event_kind: EventKind,
    pub polarity: Polarity,
    pub occurred_at: DateTime<Utc>,
    pub related_entity_id: String,
    pub exclusion_flag: bool,
    pub exclusion_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TrustEvent {
    /// A qualifying event counts toward aggregation; excluded events are
    /// retained for audit only.
    pub fn is_qualifying(&self) -> bool {
        !self.exclusion_flag
    }
}

fn decode_enum<T: FromStr<Err = EnumParseError>>(
    row: &PgRow,
    column: &'static str,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: EnumParseError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, PgRow> for TrustEvent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TrustEvent {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            role: decode_enum(row, "role")?,
            event_kind: decode_enum(row, "event_kind")?,
            polarity: decode_enum(row, "polarity")?,
            occurred_at: row.try_get("occurred_at")?,
            related_entity_id: row.try_get("related_entity_id")?,
            exclusion_flag: row.try_get("exclusion_flag")?,
            exclusion_reason: row.try_get("exclusion_reason")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

/// Current denormalized state for one trust subject. One row per
/// (subject_id, role); the sole mutable shared resource in the engine.
#[derive(Debug, Clone, Serialize)]
pub struct TrustScoreRecord {
    pub subject_id: String,
    pub role: Role,
    pub negative_events_short: i32,
    pub negative_events_medium: i32,
    pub negative_events_long: i32,
    pub distinct_counterparties: i32,
    pub total_completions: i32,
    pub recent_completions: i32,
    pub consecutive_completions: i32,
    pub trust_level: i16,
    pub integrity_hold: bool,
    pub last_recalculated_at: DateTime<Utc>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

impl TrustScoreRecord {
    /// Clean baseline for a subject with no prior history.
    pub fn baseline(subject_id: &str, role: Role, now: DateTime<Utc>) -> Self {
        TrustScoreRecord {
            subject_id: subject_id.to_string(),
            role,
            negative_events_short: 0,
            negative_events_medium: 0,
            negative_events_long: 0,
            distinct_counterparties: 0,
            total_completions: 0,
            recent_completions: 0,
            consecutive_completions: 0,
            trust_level: 0,
            integrity_hold: false,
            last_recalculated_at: now,
            last_snapshot_at: None,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for TrustScoreRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TrustScoreRecord {
            subject_id: row.try_get("subject_id")?,
            role: decode_enum(row, "role")?,
            negative_events_short: row.try_get("negative_events_short")?,
            negative_events_medium: row.try_get("negative_events_medium")?,
            negative_events_long: row.try_get("negative_events_long")?,
            distinct_counterparties: row.try_get("distinct_counterparties")?,
            total_completions: row.try_get("total_completions")?,
            recent_completions: row.try_get("recent_completions")?,
            consecutive_completions: row.try_get("consecutive_completions")?,
            trust_level: row.try_get("trust_level")?,
            integrity_hold: row.try_get("integrity_hold")?,
            last_recalculated_at: row.try_get("last_recalculated_at")?,
            last_snapshot_at: row.try_get("last_snapshot_at")?,
        })
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Promoted,
    Demoted,
    Scheduled,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Promoted => "promoted",
            SnapshotReason::Demoted => "demoted",
            SnapshotReason::Scheduled => "scheduled",
        }
    }
}

impl FromStr for SnapshotReason {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promoted" => Ok(SnapshotReason::Promoted),
            "demoted" => Ok(SnapshotReason::Demoted),
            "scheduled" => Ok(SnapshotReason::Scheduled),
            other => Err(EnumParseError {
                field: "reason",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable point-in-time copy of a score record, for audit and trend queries.
#[derive(Debug, Clone, Serialize)]
pub struct TrustSnapshot {
    pub id: i64,
    pub subject_id: String,
    pub role: Role,
    pub trust_level: i16,
    pub negative_events_short: i32,
    pub negative_events_medium: i32,
    pub negative_events_long: i32,
    pub distinct_counterparties: i32,
    pub total_completions: i32,
    pub recent_completions: i32,
    pub consecutive_completions: i32,
    pub reason: SnapshotReason,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TrustSnapshot {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TrustSnapshot {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            role: decode_enum(row, "role")?,
            trust_level: row.try_get("trust_level")?,
            negative_events_short: row.try_get("negative_events_short")?,
            negative_events_medium: row.try_get("negative_events_medium")?,
            negative_events_long: row.try_get("negative_events_long")?,
            distinct_counterparties: row.try_get("distinct_counterparties")?,
            total_completions: row.try_get("total_completions")?,
            recent_completions: row.try_get("recent_completions")?,
            consecutive_completions: row.try_get("consecutive_completions")?,
            reason: decode_enum(row, "reason")?,
            detail: row.try_get("detail")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_storage_strings() {
        assert_eq!("customer".parse::<Role>().unwrap(), Role::Customer);
        assert_eq!("provider".parse::<Role>().unwrap(), Role::Provider);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn polarity_is_fixed_per_kind() {
        assert_eq!(EventKind::NoShow.polarity(), Polarity::Negative);
        assert_eq!(EventKind::LateCancellation.polarity(), Polarity::Negative);
        assert_eq!(EventKind::Incident.polarity(), Polarity::Negative);
        assert_eq!(EventKind::Completion.polarity(), Polarity::Positive);
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let err = "ghosted".parse::<EventKind>().unwrap_err();
        assert_eq!(err.field, "event_kind");
    }
}
