pub mod api;
pub mod records;

pub use api::{
    CounterSet, EligibilityContext, EligibilityDecision, IngestOutcome, IngestResponse,
    LifecycleNotification, RecoveryProgress, TrustStatusResponse,
};
pub use records::{
    EnumParseError, EventKind, Polarity, Role, SnapshotReason, TrustEvent, TrustScoreRecord,
    TrustSnapshot,
};
