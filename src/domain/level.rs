use tracing::info;

use crate::config::TrustPolicy;
use crate::domain::aggregate::WindowCounts;

pub const MIN_LEVEL: i16 = 0;
pub const MAX_LEVEL: i16 = 3;

/// What a recalculation pass did to the stored level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Promoted { from: i16, to: i16 },
    Demoted { from: i16, to: i16 },
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelOutcome {
    pub level: i16,
    pub transition: Transition,
    /// Streak after the pass; demotion consumes the streak.
    pub streak: u32,
}

/// The level the current windowed counts imply, independent of history: the
/// highest configured rule fully satisfied, or 0.
pub fn candidate_level(counts: &WindowCounts, policy: &TrustPolicy) -> i16 {
    let mut candidate = MIN_LEVEL;
    for rule in &policy.levels {
        let satisfied = counts.per_rule.iter().any(|rc| {
            rc.level == rule.level
                && rc.negative_events >= rule.min_negative_events
                && rc.distinct_counterparties >= rule.min_distinct_counterparties
        });
        if satisfied {
            candidate = rule.level;
        }
    }
    candidate.clamp(MIN_LEVEL, MAX_LEVEL)
}

/// What caused a recalculation pass. Promotion is only considered when a
/// fresh qualifying negative event triggered the pass: windowed counts do not
/// shrink between events, so re-checking the candidate on completions or
/// housekeeping would instantly undo every recovery demotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcTrigger {
    NegativeEvent,
    PositiveEvent,
    Housekeeping,
}

/// One pass of the level state machine.
///
/// On a qualifying negative event, promotion jumps directly to the candidate
/// when it exceeds the stored level. Otherwise, a completed recovery streak
/// steps the level down by exactly one and resets the streak. The two are
/// never applied in the same pass: a fresh negative event has already reset
/// the streak before this runs, so promotion always wins over an in-progress
/// recovery.
pub fn evaluate(
    stored_level: i16,
    candidate: i16,
    streak: u32,
    trigger: RecalcTrigger,
    policy: &TrustPolicy,
) -> LevelOutcome {
    let stored = stored_level.clamp(MIN_LEVEL, MAX_LEVEL);
    let candidate = candidate.clamp(MIN_LEVEL, MAX_LEVEL);

    if trigger == RecalcTrigger::NegativeEvent && candidate > stored {
        info!(from = stored, to = candidate, "Trust level promoted");
        return LevelOutcome {
            level: candidate,
            transition: Transition::Promoted { from: stored, to: candidate },
            streak,
        };
    }

    if stored > MIN_LEVEL && streak >= policy.recovery_threshold {
        let to = stored - 1;
        info!(from = stored, to = to, streak = streak, "Trust level demoted after recovery streak");
        return LevelOutcome {
            level: to,
            transition: Transition::Demoted { from: stored, to },
            streak: 0,
        };
    }

    LevelOutcome { level: stored, transition: Transition::None, streak }
}

impl Transition {
    /// Human-readable tag recorded on the snapshot row.
    pub fn detail(&self, counts: &WindowCounts, policy: &TrustPolicy) -> String {
        match self {
            Transition::Promoted { from, to } => {
                let rule_counts = counts
                    .per_rule
                    .iter()
                    .find(|rc| rc.level == *to)
                    .map(|rc| rc.negative_events)
                    .unwrap_or(0);
                format!(
                    "promoted {} -> {}: {} qualifying negative events in window",
                    from, to, rule_counts
                )
            }
            Transition::Demoted { from, to } => format!(
                "demoted {} -> {}: recovery threshold of {} completions met",
                from, to, policy.recovery_threshold
            ),
            Transition::None => "scheduled".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregate::aggregate;
    use crate::domain::test_support::event;
    use crate::models::records::EventKind;
    use chrono::{Duration, Utc};

    fn counts_for(negatives: &[(i64, &str)]) -> WindowCounts {
        let now = Utc::now();
        let events: Vec<_> = negatives
            .iter()
            .map(|(days_ago, entity)| event(EventKind::NoShow, now - Duration::days(*days_ago), entity))
            .collect();
        aggregate(&events, &TrustPolicy::default(), now).unwrap()
    }

    #[test]
    fn one_negative_event_never_raises_the_level() {
        let policy = TrustPolicy::default();
        let counts = counts_for(&[(5, "b1")]);
        assert_eq!(candidate_level(&counts, &policy), 0);
    }

    #[test]
    fn second_event_in_short_window_reaches_level_one() {
        let policy = TrustPolicy::default();
        let counts = counts_for(&[(5, "b1"), (30, "b2")]);
        assert_eq!(candidate_level(&counts, &policy), 1);
    }

    #[test]
    fn four_events_in_medium_window_reach_level_two() {
        let policy = TrustPolicy::default();
        let counts = counts_for(&[(100, "b1"), (120, "b2"), (140, "b3"), (160, "b4")]);
        assert_eq!(candidate_level(&counts, &policy), 2);
    }

    #[test]
    fn diversity_requirement_distinguishes_one_bad_encounter() {
        let policy = TrustPolicy::default();
        // Four negatives, but all against the same counterparty: level 2 needs
        // at least two distinct related entities.
        let counts = counts_for(&[(100, "b1"), (120, "b1"), (140, "b1"), (160, "b1")]);
        assert_eq!(candidate_level(&counts, &policy), 1);
    }

    #[test]
    fn promotion_jumps_directly_to_candidate() {
        let policy = TrustPolicy::default();
        let counts = counts_for(&[(10, "b1"), (20, "b2"), (30, "b3"), (40, "b4"), (50, "b5"), (60, "b6")]);
        let candidate = candidate_level(&counts, &policy);
        assert_eq!(candidate, 3);

        let outcome = evaluate(0, candidate, 0, RecalcTrigger::NegativeEvent, &policy);
        assert_eq!(outcome.level, 3);
        assert_eq!(outcome.transition, Transition::Promoted { from: 0, to: 3 });
    }

    #[test]
    fn completed_streak_demotes_by_exactly_one() {
        let policy = TrustPolicy::default();
        let outcome = evaluate(2, 0, policy.recovery_threshold, RecalcTrigger::PositiveEvent, &policy);
        assert_eq!(outcome.level, 1);
        assert_eq!(outcome.transition, Transition::Demoted { from: 2, to: 1 });
        assert_eq!(outcome.streak, 0);
    }

    #[test]
    fn level_zero_is_the_floor() {
        let policy = TrustPolicy::default();
        let outcome = evaluate(0, 0, 99, RecalcTrigger::PositiveEvent, &policy);
        assert_eq!(outcome.level, 0);
        assert_eq!(outcome.transition, Transition::None);
    }

    #[test]
    fn promotion_takes_precedence_over_recovery() {
        let policy = TrustPolicy::default();
        // Streak at threshold but candidate above stored: promote, keep streak
        // for the recovery tracker to have reset separately.
        let outcome = evaluate(1, 2, policy.recovery_threshold, RecalcTrigger::NegativeEvent, &policy);
        assert_eq!(outcome.level, 2);
        assert!(matches!(outcome.transition, Transition::Promoted { .. }));
    }

    #[test]
    fn completions_never_re_promote_after_a_demotion() {
        let policy = TrustPolicy::default();
        // Old negatives still imply level 2, but the pass was triggered by a
        // completion: the earlier recovery demotion must stick.
        let outcome = evaluate(1, 2, 1, RecalcTrigger::PositiveEvent, &policy);
        assert_eq!(outcome.level, 1);
        assert_eq!(outcome.transition, Transition::None);

        let outcome = evaluate(1, 2, 0, RecalcTrigger::Housekeeping, &policy);
        assert_eq!(outcome.level, 1);
        assert_eq!(outcome.transition, Transition::None);
    }

    #[test]
    fn incomplete_streak_changes_nothing() {
        let policy = TrustPolicy::default();
        let outcome = evaluate(2, 1, policy.recovery_threshold - 1, RecalcTrigger::PositiveEvent, &policy);
        assert_eq!(outcome.level, 2);
        assert_eq!(outcome.transition, Transition::None);
        assert_eq!(outcome.streak, policy.recovery_threshold - 1);
    }
}
