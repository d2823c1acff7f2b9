use sqlx::PgPool;
use tracing::instrument;

use crate::config::TrustPolicy;
use crate::db::queries::{event_history, get_score_record, list_snapshots};
use crate::domain::{eligibility, recovery, DomainError};
use crate::models::records::{Role, TrustEvent, TrustScoreRecord, TrustSnapshot};
use crate::models::{
    CounterSet, EligibilityContext, EligibilityDecision, RecoveryProgress, TrustStatusResponse,
};

/// Current status for a subject: level, counters, recovery progress, and
/// human-readable guidance. Unknown subjects report a clean baseline rather
/// than an error, since every user starts in good standing.
#[instrument(skip(pool, policy), fields(subject_id = %subject_id, role = %role))]
pub async fn trust_status(
    pool: &PgPool,
    policy: &TrustPolicy,
    subject_id: &str,
    role: Role,
) -> Result<TrustStatusResponse, DomainError> {
    let record = get_score_record(pool, subject_id, role).await?;
    Ok(build_status(subject_id, role, record.as_ref(), policy))
}

/// Pure assembly of the status response, shared with tests.
pub fn build_status(
    subject_id: &str,
    role: Role,
    record: Option<&TrustScoreRecord>,
    policy: &TrustPolicy,
) -> TrustStatusResponse {
    let Some(record) = record.filter(|r| !r.integrity_hold) else {
        // No history, or reads degrading to no-restriction under a hold.
        return TrustStatusResponse {
            subject_id: subject_id.to_string(),
            role,
            level: 0,
            counters: CounterSet {
                negative_events_short: 0,
                negative_events_medium: 0,
                negative_events_long: 0,
                distinct_counterparties: 0,
                total_completions: 0,
                recent_completions: 0,
            },
            recovery_progress: RecoveryProgress {
                current: 0,
                needed: policy.recovery_threshold,
                applies: false,
            },
            guidance: Vec::new(),
            last_recalculated_at: None,
        };
    };

    let progress = recovery::progress(record, policy);
    let mut guidance = Vec::new();

    if let Some(level_policy) = policy.policy_for_level(record.trust_level) {
        guidance.extend(level_policy.warnings.iter().cloned());
    }
    if progress.applies {
        guidance.push(format!(
            "Complete {} more jobs without issues to lower your trust level ({} of {} done).",
            progress.needed.saturating_sub(progress.current),
            progress.current,
            progress.needed
        ));
    }

    TrustStatusResponse {
        subject_id: subject_id.to_string(),
        role,
        level: record.trust_level,
        counters: CounterSet::from_record(record),
        recovery_progress: progress,
        guidance,
        last_recalculated_at: Some(record.last_recalculated_at),
    }
}

/// Eligibility check against the current record. Read-only; transient read
/// failures fail open to level-0 behavior so infrastructure issues never block
/// legitimate users.
#[instrument(skip(pool, policy), fields(subject_id = %subject_id, role = %role, context = %context))]
pub async fn check_eligibility(
    pool: &PgPool,
    policy: &TrustPolicy,
    subject_id: &str,
    role: Role,
    context: EligibilityContext,
) -> EligibilityDecision {
    match get_score_record(pool, subject_id, role).await {
        Ok(record) => eligibility::check_eligibility(record.as_ref(), policy, context),
        Err(e) if e.is_retryable() => {
            tracing::warn!(error = %e, "Eligibility read failed transiently; failing open");
            EligibilityDecision::unrestricted()
        }
        Err(e) => {
            tracing::error!(error = %e, "Eligibility read failed; failing open");
            EligibilityDecision::unrestricted()
        }
    }
}

/// Full ledger history for a subject, excluded rows included. For admin and
/// support dispute review.
#[instrument(skip(pool), fields(subject_id = %subject_id, role = %role))]
pub async fn get_event_history(
    pool: &PgPool,
    subject_id: &str,
    role: Role,
) -> Result<Vec<TrustEvent>, DomainError> {
    Ok(event_history(pool, subject_id, role).await?)
}

/// Snapshot trail for trend queries and audits, newest first.
#[instrument(skip(pool), fields(subject_id = %subject_id, role = %role))]
pub async fn get_snapshots(
    pool: &PgPool,
    subject_id: &str,
    role: Role,
    limit: i64,
) -> Result<Vec<TrustSnapshot>, DomainError> {
    Ok(list_snapshots(pool, subject_id, role, limit).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn unknown_subject_reads_as_baseline() {
        let status = build_status("u1", Role::Provider, None, &TrustPolicy::default());
        assert_eq!(status.level, 0);
        assert!(status.guidance.is_empty());
        assert!(!status.recovery_progress.applies);
        assert!(status.last_recalculated_at.is_none());
    }

    #[test]
    fn integrity_hold_reads_as_baseline() {
        let mut record = TrustScoreRecord::baseline("u1", Role::Customer, Utc::now());
        record.trust_level = 3;
        record.integrity_hold = true;

        let status = build_status("u1", Role::Customer, Some(&record), &TrustPolicy::default());
        assert_eq!(status.level, 0);
        assert!(status.guidance.is_empty());
    }

    #[test]
    fn guidance_includes_recovery_progress() {
        let policy = TrustPolicy::default();
        let mut record = TrustScoreRecord::baseline("u1", Role::Customer, Utc::now());
        record.trust_level = 2;
        record.consecutive_completions = 3;

        let status = build_status("u1", Role::Customer, Some(&record), &policy);
        assert_eq!(status.level, 2);
        assert!(status
            .guidance
            .iter()
            .any(|g| g.contains("3 of 5")));
    }
}
