use sqlx::{PgPool, Postgres, Transaction};

use crate::db::errors::{DatabaseError, Result};
use crate::models::records::{Role, SnapshotReason, TrustScoreRecord, TrustSnapshot};

/// Append an immutable snapshot of the given record state. Always called
/// inside the same transaction as the state change it documents.
pub async fn insert_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    record: &TrustScoreRecord,
    reason: SnapshotReason,
    detail: &str,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO trust_snapshot (
            subject_id, role, trust_level, negative_events_short,
            negative_events_medium, negative_events_long, distinct_counterparties,
            total_completions, recent_completions, consecutive_completions,
            reason, detail
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id
        "#,
    )
    .bind(&record.subject_id)
    .bind(record.role.as_str())
    .bind(record.trust_level)
    .bind(record.negative_events_short)
    .bind(record.negative_events_medium)
    .bind(record.negative_events_long)
    .bind(record.distinct_counterparties)
    .bind(record.total_completions)
    .bind(record.recent_completions)
    .bind(record.consecutive_completions)
    .bind(reason.as_str())
    .bind(detail)
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(row.0)
}

/// Snapshot history for a subject, newest first. Serves trend queries and
/// dispute audits.
pub async fn list_snapshots(
    pool: &PgPool,
    subject_id: &str,
    role: Role,
    limit: i64,
) -> Result<Vec<TrustSnapshot>> {
    let snapshots = sqlx::query_as::<_, TrustSnapshot>(
        r#"
        SELECT id, subject_id, role, trust_level, negative_events_short,
               negative_events_medium, negative_events_long, distinct_counterparties,
               total_completions, recent_completions, consecutive_completions,
               reason, detail, created_at
        FROM trust_snapshot
        WHERE subject_id = $1 AND role = $2
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(snapshots)
}
