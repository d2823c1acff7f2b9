use crate::config::TrustPolicy;
use crate::models::records::TrustScoreRecord;
use crate::models::{EligibilityContext, EligibilityDecision};

/// Pure, side-effect-free eligibility check over the current score record and
/// the static per-level policy table. Safe to call on every submission
/// attempt.
///
/// `record` is `None` for subjects with no history; they are unrestricted.
/// A record under integrity hold degrades to unrestricted as well, so an
/// internal inconsistency never wrongly penalizes a user.
pub fn check_eligibility(
    record: Option<&TrustScoreRecord>,
    policy: &TrustPolicy,
    context: EligibilityContext,
) -> EligibilityDecision {
    let record = match record {
        Some(r) if !r.integrity_hold => r,
        _ => return EligibilityDecision::unrestricted(),
    };

    let level = record.trust_level.clamp(0, 3);
    let level_policy = match policy.policy_for_level(level) {
        Some(p) => p,
        None => return EligibilityDecision::unrestricted(),
    };

    // Subjects at level <= 1 are never hard-blocked, whatever the table says.
    let blocked = level > 1 && level_policy.blocked_contexts.contains(&context);

    EligibilityDecision {
        eligible: !blocked,
        warnings: level_policy.warnings.clone(),
        required_actions: level_policy.required_actions.clone(),
    }
}
