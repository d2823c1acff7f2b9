// Domain layer - engine logic with no HTTP concerns. The aggregation, level,
// recovery, and eligibility modules are pure; ingest and status orchestrate
// them against storage.

pub mod aggregate;
pub mod eligibility;
pub mod ingest;
pub mod level;
pub mod recovery;
pub mod status;

use crate::db::DatabaseError;

// Domain error type - no HTTP concerns
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<DatabaseError> for DomainError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(msg) => DomainError::NotFound(msg),
            DatabaseError::IntegrityError(msg) => DomainError::Integrity(msg),
            DatabaseError::InvalidData(msg) => DomainError::Validation(msg),
            other => DomainError::Database(other),
        }
    }
}

// Only wrapped storage errors are worth repeating; validation and integrity
// failures come back identical on every attempt.
impl crate::db::Retryable for DomainError {
    fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Database(e) if e.is_retryable())
    }

    fn retry_limit_exceeded(attempts: u8) -> Self {
        DomainError::Database(DatabaseError::RetryLimitExceeded { attempts })
    }
}

// Re-export the operations collaborators call.
pub use ingest::{classify, recalculate, record_lifecycle_event, run_sweep, Recalculation, SweepStats};
pub use status::{build_status, check_eligibility, get_event_history, get_snapshots, trust_status};

#[cfg(test)]
pub mod test_support {
    use chrono::{DateTime, Utc};

    use crate::models::records::{EventKind, TrustEvent};

    static NEXT_ID: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(1);

    pub fn event(kind: EventKind, occurred_at: DateTime<Utc>, related_entity_id: &str) -> TrustEvent {
        TrustEvent {
            id: NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            subject_id: "user-1".to_string(),
            role: crate::models::records::Role::Customer,
            event_kind: kind,
            polarity: kind.polarity(),
            occurred_at,
            related_entity_id: related_entity_id.to_string(),
            exclusion_flag: false,
            exclusion_reason: None,
            recorded_at: occurred_at,
        }
    }

    pub fn excluded_event(
        kind: EventKind,
        occurred_at: DateTime<Utc>,
        related_entity_id: &str,
        reason: &str,
    ) -> TrustEvent {
        let mut e = event(kind, occurred_at, related_entity_id);
        e.exclusion_flag = true;
        e.exclusion_reason = Some(reason.to_string());
        e
    }
}
