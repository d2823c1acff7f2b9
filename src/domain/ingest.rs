use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use crate::config::TrustPolicy;
use crate::db::connection::with_retry;
use crate::db::errors::DatabaseError;
use crate::db::queries::{
    insert_event, list_score_records_after, load_subject_events, lock_score_record,
    update_score_record, NewEvent,
};
use crate::db::queries::snapshots::insert_snapshot;
use crate::domain::aggregate::{aggregate, WindowCounts};
use crate::domain::level::{candidate_level, evaluate, RecalcTrigger, Transition};
use crate::domain::recovery::advance_streak;
use crate::domain::DomainError;
use crate::models::records::{EventKind, Polarity, Role, SnapshotReason, TrustEvent, TrustScoreRecord};
use crate::models::{IngestOutcome, IngestResponse, LifecycleNotification};

/// Classify a collaborator's raw lifecycle kind into the closed event set.
/// The booking and job subsystems emit slightly different verbs for the same
/// transitions, so a few aliases are accepted per kind.
pub fn classify(raw_kind: &str) -> Result<EventKind, DomainError> {
    match raw_kind {
        "no_show" | "no_show_confirmed" => Ok(EventKind::NoShow),
        "late_cancellation" | "booking_cancelled_late" => Ok(EventKind::LateCancellation),
        "incident" | "incident_confirmed" => Ok(EventKind::Incident),
        "completion" | "job_completed" | "booking_completed" => Ok(EventKind::Completion),
        other => Err(DomainError::Validation(format!(
            "unknown lifecycle kind: {}",
            other
        ))),
    }
}

fn validate(
    notification: &LifecycleNotification,
    policy: &TrustPolicy,
    now: DateTime<Utc>,
) -> Result<EventKind, DomainError> {
    if notification.subject_id.trim().is_empty() {
        return Err(DomainError::Validation("subject_id must not be empty".into()));
    }
    if notification.related_entity_id.trim().is_empty() {
        return Err(DomainError::Validation("related_entity_id must not be empty".into()));
    }
    if notification.occurred_at > now + Duration::minutes(policy.max_future_skew_minutes) {
        return Err(DomainError::Validation(format!(
            "occurred_at {} is in the future",
            notification.occurred_at
        )));
    }
    classify(&notification.raw_kind)
}

/// Result of one recalculation pass over a subject's ledger.
#[derive(Debug, Clone)]
pub struct Recalculation {
    pub record: TrustScoreRecord,
    pub transition: Transition,
    pub counts: WindowCounts,
}

/// Pure recalculation step shared by ingestion and the housekeeping sweep:
/// advance the recovery streak for the newly ingested event (if any), rebuild
/// the windowed counters from the ledger, then run the level state machine.
pub fn recalculate(
    record: &TrustScoreRecord,
    events: &[TrustEvent],
    new_event: Option<(Polarity, bool)>,
    policy: &TrustPolicy,
    now: DateTime<Utc>,
) -> Result<Recalculation, DomainError> {
    let (streak, trigger) = match new_event {
        Some((polarity, excluded)) => {
            let streak = advance_streak(record.consecutive_completions, polarity, excluded);
            let trigger = match (polarity, excluded) {
                (_, true) => RecalcTrigger::Housekeeping,
                (Polarity::Negative, false) => RecalcTrigger::NegativeEvent,
                (Polarity::Positive, false) => RecalcTrigger::PositiveEvent,
            };
            (streak, trigger)
        }
        None => (
            record.consecutive_completions.max(0),
            RecalcTrigger::Housekeeping,
        ),
    };

    let counts = aggregate(events, policy, now)?;
    let candidate = candidate_level(&counts, policy);
    let outcome = evaluate(record.trust_level, candidate, streak as u32, trigger, policy);

    let mut updated = record.clone();
    counts.apply_to(&mut updated, now);
    updated.trust_level = outcome.level;
    updated.consecutive_completions = outcome.streak as i32;

    Ok(Recalculation {
        record: updated,
        transition: outcome.transition,
        counts,
    })
}

// Transient storage failures roll the whole attempt back, so repeating the
// write is safe; the dedup key absorbs any attempt that did land.
const MAX_WRITE_ATTEMPTS: u8 = 3;

/// Ingest one lifecycle notification: validate, append to the ledger, and run
/// the full recalculation chain, all inside a single transaction so no reader
/// ever observes a ledger entry whose derived score has not caught up.
/// Transient storage failures are retried with backoff.
///
/// Repeat deliveries of the same (subject, related entity, kind) commit as a
/// no-op success. The notification names exactly one subject and only that
/// subject's record is touched.
#[instrument(skip(pool, policy, notification), fields(
    subject_id = %notification.subject_id,
    role = %notification.role,
    raw_kind = %notification.raw_kind,
))]
pub async fn record_lifecycle_event(
    pool: &PgPool,
    policy: &TrustPolicy,
    notification: &LifecycleNotification,
) -> Result<IngestResponse, DomainError> {
    with_retry(MAX_WRITE_ATTEMPTS, || ingest_once(pool, policy, notification)).await
}

async fn ingest_once(
    pool: &PgPool,
    policy: &TrustPolicy,
    notification: &LifecycleNotification,
) -> Result<IngestResponse, DomainError> {
    let now = Utc::now();
    let event_kind = validate(notification, policy, now)?;
    let excluded = notification.exclusion_reason.is_some();

    let mut tx = pool
        .begin()
        .await
        .map_err(DatabaseError::QueryError)?;

    // Serializes all writers for this subject; other subjects proceed freely.
    let record = lock_score_record(&mut tx, &notification.subject_id, notification.role).await?;

    if record.integrity_hold {
        return Err(DomainError::Integrity(format!(
            "writes for subject {}/{} are held pending operator resolution",
            record.subject_id, record.role
        )));
    }

    let new_event = NewEvent {
        subject_id: &notification.subject_id,
        role: notification.role,
        event_kind,
        occurred_at: notification.occurred_at,
        related_entity_id: &notification.related_entity_id,
        exclusion_reason: notification.exclusion_reason.as_deref(),
    };

    let inserted = insert_event(&mut tx, &new_event).await?;
    if inserted.is_none() {
        // At-least-once delivery: already ingested, report success unchanged.
        tx.commit()
            .await
            .map_err(DatabaseError::QueryError)?;
        info!("Duplicate lifecycle notification ignored");
        return Ok(IngestResponse {
            outcome: IngestOutcome::Duplicate,
            trust_level: record.trust_level,
        });
    }

    let events =
        load_subject_events(&mut tx, &notification.subject_id, notification.role).await?;

    let recalc = match recalculate(
        &record,
        &events,
        Some((event_kind.polarity(), excluded)),
        policy,
        now,
    ) {
        Ok(recalc) => recalc,
        Err(DomainError::Integrity(msg)) => {
            // Clamp to the last known-good level: drop this write entirely,
            // then flag the subject so further writes are held.
            drop(tx);
            error!(error = %msg, "Aggregation produced an impossible state; holding subject");
            set_integrity_hold(pool, &notification.subject_id, notification.role).await?;
            return Err(DomainError::Integrity(msg));
        }
        Err(e) => return Err(e),
    };

    let mut updated = recalc.record;
    match recalc.transition {
        Transition::Promoted { .. } => {
            updated.last_snapshot_at = Some(now);
            insert_snapshot(
                &mut tx,
                &updated,
                SnapshotReason::Promoted,
                &recalc.transition.detail(&recalc.counts, policy),
            )
            .await?;
        }
        Transition::Demoted { .. } => {
            updated.last_snapshot_at = Some(now);
            insert_snapshot(
                &mut tx,
                &updated,
                SnapshotReason::Demoted,
                &recalc.transition.detail(&recalc.counts, policy),
            )
            .await?;
        }
        Transition::None => {}
    }

    update_score_record(&mut tx, &updated).await?;

    tx.commit()
        .await
        .map_err(DatabaseError::QueryError)?;

    info!(trust_level = updated.trust_level, "Lifecycle event recorded");
    Ok(IngestResponse {
        outcome: IngestOutcome::Recorded,
        trust_level: updated.trust_level,
    })
}

async fn set_integrity_hold(pool: &PgPool, subject_id: &str, role: Role) -> Result<(), DomainError> {
    sqlx::query(
        "UPDATE trust_score_record SET integrity_hold = TRUE WHERE subject_id = $1 AND role = $2",
    )
    .bind(subject_id)
    .bind(role.as_str())
    .execute(pool)
    .await
    .map_err(DatabaseError::QueryError)?;
    Ok(())
}

/// Counters produced by one sweep run, for the operator log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub subjects_recalculated: usize,
    pub snapshots_written: usize,
    pub subjects_skipped: usize,
}

/// Window-expiry housekeeping and scheduled snapshots. Runs as a single
/// cooperative task; each subject is recalculated under the same per-subject
/// lock the ingest path takes.
#[instrument(skip(pool, policy))]
pub async fn run_sweep(pool: &PgPool, policy: &TrustPolicy) -> Result<SweepStats, DomainError> {
    let mut stats = SweepStats::default();
    let mut cursor: Option<(String, Role)> = None;

    loop {
        let page = list_score_records_after(
            pool,
            cursor.as_ref().map(|(s, r)| (s.as_str(), *r)),
            100,
        )
        .await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some((last.subject_id.clone(), last.role));

        for record in &page {
            if record.integrity_hold {
                stats.subjects_skipped += 1;
                continue;
            }
            let swept = with_retry(MAX_WRITE_ATTEMPTS, || {
                sweep_subject(pool, policy, &record.subject_id, record.role)
            })
            .await;
            match swept {
                Ok(snapshotted) => {
                    stats.subjects_recalculated += 1;
                    if snapshotted {
                        stats.snapshots_written += 1;
                    }
                }
                Err(e) if holds_subject(&e) => {
                    error!(
                        subject_id = %record.subject_id,
                        role = %record.role,
                        error = %e,
                        "Sweep found an impossible state; holding subject"
                    );
                    set_integrity_hold(pool, &record.subject_id, record.role).await?;
                    stats.subjects_skipped += 1;
                }
                Err(e) => {
                    warn!(
                        subject_id = %record.subject_id,
                        role = %record.role,
                        error = %e,
                        "Sweep failed for subject; continuing"
                    );
                    stats.subjects_skipped += 1;
                }
            }
        }
    }

    info!(
        recalculated = stats.subjects_recalculated,
        snapshots = stats.snapshots_written,
        skipped = stats.subjects_skipped,
        "Sweep complete"
    );
    Ok(stats)
}

/// Only an impossible counter state quarantines the subject, same as on the
/// ingest path; transient failures wait for the next sweep.
fn holds_subject(e: &DomainError) -> bool {
    matches!(e, DomainError::Integrity(_))
}

async fn sweep_subject(
    pool: &PgPool,
    policy: &TrustPolicy,
    subject_id: &str,
    role: Role,
) -> Result<bool, DomainError> {
    let now = Utc::now();
    let mut tx = pool
        .begin()
        .await
        .map_err(DatabaseError::QueryError)?;

    let record = lock_score_record(&mut tx, subject_id, role).await?;
    if record.integrity_hold {
        return Ok(false);
    }

    let events = load_subject_events(&mut tx, subject_id, role).await?;
    let recalc = recalculate(&record, &events, None, policy, now)?;

    let mut updated = recalc.record;
    let snapshot_due = match updated.last_snapshot_at {
        Some(at) => now - at >= Duration::days(policy.snapshot_interval_days),
        None => true,
    };

    let mut snapshotted = false;
    match recalc.transition {
        Transition::Demoted { .. } => {
            updated.last_snapshot_at = Some(now);
            insert_snapshot(
                &mut tx,
                &updated,
                SnapshotReason::Demoted,
                &recalc.transition.detail(&recalc.counts, policy),
            )
            .await?;
            snapshotted = true;
        }
        Transition::Promoted { .. } => {
            updated.last_snapshot_at = Some(now);
            insert_snapshot(
                &mut tx,
                &updated,
                SnapshotReason::Promoted,
                &recalc.transition.detail(&recalc.counts, policy),
            )
            .await?;
            snapshotted = true;
        }
        Transition::None if snapshot_due => {
            updated.last_snapshot_at = Some(now);
            insert_snapshot(&mut tx, &updated, SnapshotReason::Scheduled, "scheduled").await?;
            snapshotted = true;
        }
        Transition::None => {}
    }

    update_score_record(&mut tx, &updated).await?;
    tx.commit()
        .await
        .map_err(DatabaseError::QueryError)?;

    Ok(snapshotted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::records::Role;

    fn notification(raw_kind: &str) -> LifecycleNotification {
        LifecycleNotification {
            subject_id: "user-1".to_string(),
            role: Role::Customer,
            raw_kind: raw_kind.to_string(),
            occurred_at: Utc::now(),
            related_entity_id: "booking-1".to_string(),
            exclusion_reason: None,
        }
    }

    #[test]
    fn known_kinds_classify() {
        assert_eq!(classify("no_show_confirmed").unwrap(), EventKind::NoShow);
        assert_eq!(classify("booking_cancelled_late").unwrap(), EventKind::LateCancellation);
        assert_eq!(classify("incident_confirmed").unwrap(), EventKind::Incident);
        assert_eq!(classify("job_completed").unwrap(), EventKind::Completion);
    }

    #[test]
    fn unknown_kind_is_a_validation_error() {
        assert!(matches!(classify("refund_issued"), Err(DomainError::Validation(_))));
    }

    #[test]
    fn empty_ids_are_rejected() {
        let policy = TrustPolicy::default();
        let now = Utc::now();

        let mut n = notification("no_show");
        n.subject_id = " ".to_string();
        assert!(matches!(validate(&n, &policy, now), Err(DomainError::Validation(_))));

        let mut n = notification("no_show");
        n.related_entity_id = String::new();
        assert!(matches!(validate(&n, &policy, now), Err(DomainError::Validation(_))));
    }

    #[test]
    fn far_future_timestamps_are_rejected() {
        let policy = TrustPolicy::default();
        let now = Utc::now();
        let mut n = notification("no_show");
        n.occurred_at = now + Duration::hours(2);
        assert!(matches!(validate(&n, &policy, now), Err(DomainError::Validation(_))));

        // Small skew within tolerance is fine
        let mut n = notification("no_show");
        n.occurred_at = now + Duration::minutes(5);
        assert!(validate(&n, &policy, now).is_ok());
    }

    #[tokio::test]
    async fn transient_storage_errors_are_retried_for_writes() {
        let mut attempts = 0;

        let result = with_retry(MAX_WRITE_ATTEMPTS, || {
            attempts += 1;
            async move {
                if attempts < 2 {
                    Err(DomainError::Database(DatabaseError::ConnectionError(
                        "storage down".to_string(),
                    )))
                } else {
                    Ok(attempts)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn validation_failures_are_never_retried() {
        let mut attempts = 0;

        let result: Result<(), DomainError> = with_retry(MAX_WRITE_ATTEMPTS, || {
            attempts += 1;
            async move { Err(DomainError::Validation("bad payload".to_string())) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), DomainError::Validation(_)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn only_impossible_states_hold_a_swept_subject() {
        assert!(holds_subject(&DomainError::Integrity("counter out of range".into())));
        assert!(!holds_subject(&DomainError::Database(
            DatabaseError::ConnectionError("storage down".into())
        )));
        assert!(!holds_subject(&DomainError::Validation("bad".into())));
    }
}
