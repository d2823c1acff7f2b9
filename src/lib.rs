pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod models;

// Re-export commonly used types
pub use config::{LevelPolicy, LevelRule, TrustPolicy, WindowConfig};

pub use models::{
    EligibilityContext, EligibilityDecision, EventKind, IngestOutcome, IngestResponse,
    LifecycleNotification, Polarity, RecoveryProgress, Role, SnapshotReason, TrustEvent,
    TrustScoreRecord, TrustSnapshot, TrustStatusResponse,
};

pub use db::{build_pool, with_retry, DatabaseError, Retryable};

pub use domain::{
    check_eligibility, get_event_history, get_snapshots, record_lifecycle_event, run_sweep,
    trust_status, DomainError,
};
