use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::config::TrustPolicy;
use crate::domain::DomainError;
use crate::models::records::{Polarity, TrustEvent, TrustScoreRecord};

/// Negative-event tally for one configured level rule's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCounts {
    pub level: i16,
    pub negative_events: u32,
    pub distinct_counterparties: u32,
}

/// Everything the level evaluator and the status API need, computed from a
/// single pass over the subject's ledger slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounts {
    pub negative_events_short: i32,
    pub negative_events_medium: i32,
    pub negative_events_long: i32,
    /// Distinct related entities among negative events in the long window.
    pub distinct_counterparties: i32,
    pub total_completions: i32,
    /// Completions inside the medium window.
    pub recent_completions: i32,
    pub per_rule: Vec<RuleCounts>,
}

/// Recompute rolling-window counters from the ledger. This is the naive
/// full-scan reference: the contract is that the output equals a scan of the
/// ledger restricted to each window, and that excluded events are skipped
/// entirely.
pub fn aggregate(
    events: &[TrustEvent],
    policy: &TrustPolicy,
    now: DateTime<Utc>,
) -> Result<WindowCounts, DomainError> {
    let short_cutoff = now - Duration::days(policy.windows.short_days);
    let medium_cutoff = now - Duration::days(policy.windows.medium_days);
    let long_cutoff = now - Duration::days(policy.windows.long_days);

    let mut counts = WindowCounts {
        negative_events_short: 0,
        negative_events_medium: 0,
        negative_events_long: 0,
        distinct_counterparties: 0,
        total_completions: 0,
        recent_completions: 0,
        per_rule: policy
            .levels
            .iter()
            .map(|rule| RuleCounts {
                level: rule.level,
                negative_events: 0,
                distinct_counterparties: 0,
            })
            .collect(),
    };

    let mut long_counterparties: HashSet<&str> = HashSet::new();
    let mut rule_counterparties: Vec<HashSet<&str>> =
        policy.levels.iter().map(|_| HashSet::new()).collect();

    for event in events {
        if !event.is_qualifying() {
            continue;
        }

        match event.polarity {
            Polarity::Positive => {
                counts.total_completions += 1;
                if event.occurred_at >= medium_cutoff {
                    counts.recent_completions += 1;
                }
            }
            Polarity::Negative => {
                if event.occurred_at >= short_cutoff {
                    counts.negative_events_short += 1;
                }
                if event.occurred_at >= medium_cutoff {
                    counts.negative_events_medium += 1;
                }
                if event.occurred_at >= long_cutoff {
                    counts.negative_events_long += 1;
                    long_counterparties.insert(event.related_entity_id.as_str());
                }

                for (idx, rule) in policy.levels.iter().enumerate() {
                    if event.occurred_at >= now - Duration::days(rule.window_days) {
                        counts.per_rule[idx].negative_events += 1;
                        rule_counterparties[idx].insert(event.related_entity_id.as_str());
                    }
                }
            }
        }
    }

    counts.distinct_counterparties = long_counterparties.len() as i32;
    for (idx, set) in rule_counterparties.iter().enumerate() {
        counts.per_rule[idx].distinct_counterparties = set.len() as u32;
    }

    verify(&counts, events.len(), policy)?;
    Ok(counts)
}

/// Reject impossible counter states before they reach any consumer. With
/// ascending windows a shorter window can never hold more events than a
/// longer one, and no counter can exceed the ledger slice length.
fn verify(counts: &WindowCounts, ledger_len: usize, policy: &TrustPolicy) -> Result<(), DomainError> {
    let ledger_len = ledger_len as i64;

    let all = [
        counts.negative_events_short,
        counts.negative_events_medium,
        counts.negative_events_long,
        counts.distinct_counterparties,
        counts.total_completions,
        counts.recent_completions,
    ];
    if all.iter().any(|&c| c < 0 || c as i64 > ledger_len) {
        return Err(DomainError::Integrity(format!(
            "counter out of range for ledger of {} events: {:?}",
            ledger_len, counts
        )));
    }

    let windows_ascending = policy.windows.short_days <= policy.windows.medium_days
        && policy.windows.medium_days <= policy.windows.long_days;
    if windows_ascending
        && (counts.negative_events_short > counts.negative_events_medium
            || counts.negative_events_medium > counts.negative_events_long)
    {
        return Err(DomainError::Integrity(format!(
            "window counts not monotone: {}/{}/{}",
            counts.negative_events_short,
            counts.negative_events_medium,
            counts.negative_events_long
        )));
    }

    Ok(())
}

impl WindowCounts {
    /// Overwrite the non-level, non-streak fields of a score record.
    pub fn apply_to(&self, record: &mut TrustScoreRecord, now: DateTime<Utc>) {
        record.negative_events_short = self.negative_events_short;
        record.negative_events_medium = self.negative_events_medium;
        record.negative_events_long = self.negative_events_long;
        record.distinct_counterparties = self.distinct_counterparties;
        record.total_completions = self.total_completions;
        record.recent_completions = self.recent_completions;
        record.last_recalculated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{event, excluded_event};
    use crate::models::records::EventKind;
    use chrono::Duration;

    fn policy() -> TrustPolicy {
        TrustPolicy::default()
    }

    #[test]
    fn empty_ledger_aggregates_to_zero() {
        let counts = aggregate(&[], &policy(), Utc::now()).unwrap();
        assert_eq!(counts.negative_events_short, 0);
        assert_eq!(counts.total_completions, 0);
        assert!(counts.per_rule.iter().all(|r| r.negative_events == 0));
    }

    #[test]
    fn events_fall_into_the_right_windows() {
        let now = Utc::now();
        let events = vec![
            event(EventKind::NoShow, now - Duration::days(10), "b1"),
            event(EventKind::NoShow, now - Duration::days(120), "b2"),
            event(EventKind::Incident, now - Duration::days(300), "b3"),
            event(EventKind::Completion, now - Duration::days(5), "b4"),
            event(EventKind::Completion, now - Duration::days(200), "b5"),
        ];

        let counts = aggregate(&events, &policy(), now).unwrap();
        assert_eq!(counts.negative_events_short, 1);
        assert_eq!(counts.negative_events_medium, 2);
        assert_eq!(counts.negative_events_long, 3);
        assert_eq!(counts.distinct_counterparties, 3);
        assert_eq!(counts.total_completions, 2);
        assert_eq!(counts.recent_completions, 1);
    }

    #[test]
    fn excluded_events_never_count() {
        let now = Utc::now();
        let events = vec![
            event(EventKind::NoShow, now - Duration::days(1), "b1"),
            excluded_event(EventKind::NoShow, now - Duration::days(2), "b2", "platform_outage"),
            excluded_event(EventKind::Completion, now - Duration::days(3), "b3", "mutual_reschedule"),
        ];

        let counts = aggregate(&events, &policy(), now).unwrap();
        assert_eq!(counts.negative_events_short, 1);
        assert_eq!(counts.negative_events_long, 1);
        assert_eq!(counts.total_completions, 0);
    }

    #[test]
    fn distinct_counterparties_deduplicate_related_entities() {
        let now = Utc::now();
        // Two no-shows against the same booking counterparty
        let events = vec![
            event(EventKind::NoShow, now - Duration::days(1), "b1"),
            event(EventKind::LateCancellation, now - Duration::days(2), "b1"),
            event(EventKind::NoShow, now - Duration::days(3), "b2"),
        ];

        let counts = aggregate(&events, &policy(), now).unwrap();
        assert_eq!(counts.negative_events_short, 3);
        assert_eq!(counts.distinct_counterparties, 2);
        // Rule windows track their own distinct sets
        assert_eq!(counts.per_rule[0].distinct_counterparties, 2);
    }

    #[test]
    fn matches_naive_window_scan() {
        let now = Utc::now();
        let mut events = Vec::new();
        for day in 0..400 {
            let kind = if day % 3 == 0 { EventKind::NoShow } else { EventKind::Completion };
            events.push(event(kind, now - Duration::days(day), &format!("b{}", day)));
        }

        let counts = aggregate(&events, &policy(), now).unwrap();

        let naive = |days: i64| {
            events
                .iter()
                .filter(|e| {
                    e.polarity == Polarity::Negative
                        && e.occurred_at >= now - Duration::days(days)
                })
                .count() as i32
        };
        assert_eq!(counts.negative_events_short, naive(90));
        assert_eq!(counts.negative_events_medium, naive(180));
        assert_eq!(counts.negative_events_long, naive(365));
    }
}
