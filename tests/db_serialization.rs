//! Per-subject write serialization against a live Postgres. These tests need
//! a real database, so they are ignored by default:
//!
//!     DATABASE_URL=postgres://... cargo test --test db_serialization -- --ignored

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use trust_engine::db::queries::get_score_record;
use trust_engine::{
    record_lifecycle_event, IngestOutcome, LifecycleNotification, Role, TrustPolicy,
};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to the test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

// Unique per run so reruns never collide with committed ledger rows.
fn fresh_subject(prefix: &str) -> String {
    format!(
        "{}-{}",
        prefix,
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

fn completion(subject_id: &str, booking: &str) -> LifecycleNotification {
    LifecycleNotification {
        subject_id: subject_id.to_string(),
        role: Role::Provider,
        raw_kind: "job_completed".to_string(),
        occurred_at: Utc::now(),
        related_entity_id: booking.to_string(),
        exclusion_reason: None,
    }
}

#[tokio::test]
#[ignore]
async fn concurrent_completions_each_advance_the_streak() {
    let pool = test_pool().await;
    let policy = TrustPolicy::default();
    let subject = fresh_subject("race-streak");

    let event_a = completion(&subject, "booking-a");
    let event_b = completion(&subject, "booking-b");
    let (a, b) = tokio::join!(
        record_lifecycle_event(&pool, &policy, &event_a),
        record_lifecycle_event(&pool, &policy, &event_b),
    );
    assert_eq!(a.unwrap().outcome, IngestOutcome::Recorded);
    assert_eq!(b.unwrap().outcome, IngestOutcome::Recorded);

    // The row lock serializes the two writers; neither increment may be lost.
    let record = get_score_record(&pool, &subject, Role::Provider)
        .await
        .unwrap()
        .expect("score record exists after ingestion");
    assert_eq!(record.consecutive_completions, 2);
    assert_eq!(record.total_completions, 2);
    assert_eq!(record.trust_level, 0);
}

#[tokio::test]
#[ignore]
async fn concurrent_duplicate_deliveries_commit_once() {
    let pool = test_pool().await;
    let policy = TrustPolicy::default();
    let subject = fresh_subject("race-dedup");

    let event_a = completion(&subject, "booking-a");
    let event_b = completion(&subject, "booking-a");
    let (a, b) = tokio::join!(
        record_lifecycle_event(&pool, &policy, &event_a),
        record_lifecycle_event(&pool, &policy, &event_b),
    );
    let outcomes = [a.unwrap().outcome, b.unwrap().outcome];
    assert!(outcomes.contains(&IngestOutcome::Recorded));
    assert!(outcomes.contains(&IngestOutcome::Duplicate));

    let record = get_score_record(&pool, &subject, Role::Provider)
        .await
        .unwrap()
        .expect("score record exists after ingestion");
    assert_eq!(record.consecutive_completions, 1);
    assert_eq!(record.total_completions, 1);
}
