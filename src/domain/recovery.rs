use crate::config::TrustPolicy;
use crate::models::records::{Polarity, TrustScoreRecord};
use crate::models::RecoveryProgress;

/// Advance the consecutive-completion streak for one newly ingested event.
///
/// The streak is sequence-based, not time-windowed: +1 for every non-excluded
/// positive event, reset to 0 on every non-excluded negative event regardless
/// of whether that event changes the trust level, untouched by excluded events.
pub fn advance_streak(current: i32, polarity: Polarity, excluded: bool) -> i32 {
    if excluded {
        return current.max(0);
    }
    match polarity {
        Polarity::Positive => current.max(0) + 1,
        Polarity::Negative => 0,
    }
}

/// Current progress toward the next automatic demotion, e.g. "3 of 5 needed".
pub fn progress(record: &TrustScoreRecord, policy: &TrustPolicy) -> RecoveryProgress {
    RecoveryProgress {
        current: record.consecutive_completions.max(0) as u32,
        needed: policy.recovery_threshold,
        applies: record.trust_level > 0,
    }
}
