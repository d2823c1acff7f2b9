use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::db::errors::{DatabaseError, Result};
use crate::models::records::{EventKind, Role, TrustEvent};

/// Parameters for one ledger insert, already classified by ingestion.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub subject_id: &'a str,
    pub role: Role,
    pub event_kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub related_entity_id: &'a str,
    pub exclusion_reason: Option<&'a str>,
}

/// Append one event to the ledger. Returns `None` when the dedup key
/// (subject, role, related entity, kind) already exists, which callers treat
/// as an idempotent no-op.
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewEvent<'_>,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        INSERT INTO trust_event (
            subject_id, role, event_kind, polarity, occurred_at,
            related_entity_id, exclusion_flag, exclusion_reason
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT ON CONSTRAINT trust_event_dedup DO NOTHING
        RETURNING id
        "#,
    )
    .bind(event.subject_id)
    .bind(event.role.as_str())
    .bind(event.event_kind.as_str())
    .bind(event.event_kind.polarity().as_str())
    .bind(event.occurred_at)
    .bind(event.related_entity_id)
    .bind(event.exclusion_reason.is_some())
    .bind(event.exclusion_reason)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(row.map(|r| r.get::<i64, _>("id")))
}

/// Load every event for a subject in `occurred_at` order, oldest first. This
/// is the slice the aggregator scans. Excluded events are included; the
/// aggregator skips them itself.
pub async fn load_subject_events(
    tx: &mut Transaction<'_, Postgres>,
    subject_id: &str,
    role: Role,
) -> Result<Vec<TrustEvent>> {
    let events = sqlx::query_as::<_, TrustEvent>(
        r#"
        SELECT id, subject_id, role, event_kind, polarity, occurred_at,
               related_entity_id, exclusion_flag, exclusion_reason, recorded_at
        FROM trust_event
        WHERE subject_id = $1 AND role = $2
        ORDER BY occurred_at ASC, id ASC
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .fetch_all(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    debug!(
        subject_id = %subject_id,
        role = %role,
        count = events.len(),
        "Loaded ledger slice"
    );
    Ok(events)
}

/// Full event history for a subject, newest first, excluded rows included.
/// Serves admin/support dispute review.
pub async fn event_history(
    pool: &PgPool,
    subject_id: &str,
    role: Role,
) -> Result<Vec<TrustEvent>> {
    let events = sqlx::query_as::<_, TrustEvent>(
        r#"
        SELECT id, subject_id, role, event_kind, polarity, occurred_at,
               related_entity_id, exclusion_flag, exclusion_reason, recorded_at
        FROM trust_event
        WHERE subject_id = $1 AND role = $2
        ORDER BY occurred_at DESC, id DESC
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(events)
}
