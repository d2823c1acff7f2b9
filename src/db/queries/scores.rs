use sqlx::{PgPool, Postgres, Transaction};

use crate::db::errors::{DatabaseError, Result};
use crate::models::records::{Role, TrustScoreRecord};

/// Upsert-then-lock the subject's score record row. The `FOR UPDATE` lock is
/// what serializes concurrent writers for the same subject; different subjects
/// lock different rows and never contend.
pub async fn lock_score_record(
    tx: &mut Transaction<'_, Postgres>,
    subject_id: &str,
    role: Role,
) -> Result<TrustScoreRecord> {
    sqlx::query(
        r#"
        INSERT INTO trust_score_record (subject_id, role)
        VALUES ($1, $2)
        ON CONFLICT (subject_id, role) DO NOTHING
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    let record = sqlx::query_as::<_, TrustScoreRecord>(
        r#"
        SELECT subject_id, role, negative_events_short, negative_events_medium,
               negative_events_long, distinct_counterparties, total_completions,
               recent_completions, consecutive_completions, trust_level,
               integrity_hold, last_recalculated_at, last_snapshot_at
        FROM trust_score_record
        WHERE subject_id = $1 AND role = $2
        FOR UPDATE
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(record)
}

/// Read-only fetch for the status and eligibility paths. Never takes the
/// write lock.
pub async fn get_score_record(
    pool: &PgPool,
    subject_id: &str,
    role: Role,
) -> Result<Option<TrustScoreRecord>> {
    let record = sqlx::query_as::<_, TrustScoreRecord>(
        r#"
        SELECT subject_id, role, negative_events_short, negative_events_medium,
               negative_events_long, distinct_counterparties, total_completions,
               recent_completions, consecutive_completions, trust_level,
               integrity_hold, last_recalculated_at, last_snapshot_at
        FROM trust_score_record
        WHERE subject_id = $1 AND role = $2
        "#,
    )
    .bind(subject_id)
    .bind(role.as_str())
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(record)
}

/// Overwrite the derived fields of a locked score record.
pub async fn update_score_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &TrustScoreRecord,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE trust_score_record SET
            negative_events_short = $3,
            negative_events_medium = $4,
            negative_events_long = $5,
            distinct_counterparties = $6,
            total_completions = $7,
            recent_completions = $8,
            consecutive_completions = $9,
            trust_level = $10,
            integrity_hold = $11,
            last_recalculated_at = $12,
            last_snapshot_at = $13
        WHERE subject_id = $1 AND role = $2
        "#,
    )
    .bind(&record.subject_id)
    .bind(record.role.as_str())
    .bind(record.negative_events_short)
    .bind(record.negative_events_medium)
    .bind(record.negative_events_long)
    .bind(record.distinct_counterparties)
    .bind(record.total_completions)
    .bind(record.recent_completions)
    .bind(record.consecutive_completions)
    .bind(record.trust_level)
    .bind(record.integrity_hold)
    .bind(record.last_recalculated_at)
    .bind(record.last_snapshot_at)
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    if result.rows_affected() != 1 {
        return Err(DatabaseError::NotFound(format!(
            "score record {}/{}",
            record.subject_id, record.role
        )));
    }

    Ok(())
}

/// Keyset-paged listing of subjects for the housekeeping sweep.
pub async fn list_score_records_after(
    pool: &PgPool,
    after: Option<(&str, Role)>,
    limit: i64,
) -> Result<Vec<TrustScoreRecord>> {
    let (after_subject, after_role) = match after {
        Some((subject, role)) => (subject.to_string(), role.as_str().to_string()),
        None => (String::new(), String::new()),
    };

    let records = sqlx::query_as::<_, TrustScoreRecord>(
        r#"
        SELECT subject_id, role, negative_events_short, negative_events_medium,
               negative_events_long, distinct_counterparties, total_completions,
               recent_completions, consecutive_completions, trust_level,
               integrity_hold, last_recalculated_at, last_snapshot_at
        FROM trust_score_record
        WHERE (subject_id, role) > ($1, $2)
        ORDER BY subject_id, role
        LIMIT $3
        "#,
    )
    .bind(after_subject)
    .bind(after_role)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(records)
}
