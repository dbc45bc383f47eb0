// Immutable view of every target's latest known run.
// Built wholesale by the aggregator and replaced as a unit on each publish.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::PermanentCause;
use crate::model::{Status, WorkflowRun};
use crate::target::MonitorTarget;

/// The newest matching run for a target, plus how the last finished run ended.
///
/// Equality ignores `checked_at`: polling the same run again is not a change.
#[derive(Debug, Clone)]
pub struct TrackedRun {
    pub run: WorkflowRun,
    /// Status of the newest completed matching run, when `run` is still going.
    /// Equal to `run.status` when `run` itself has completed.
    pub last_completed: Option<Status>,
    pub checked_at: DateTime<Utc>,
}

impl PartialEq for TrackedRun {
    fn eq(&self, other: &Self) -> bool {
        self.run == other.run && self.last_completed == other.last_completed
    }
}

/// What is known about one polled target.
///
/// Entries compare by what they show; poll and failure timestamps are ignored.
#[derive(Debug, Clone)]
pub enum TargetEntry {
    /// Polled successfully, but no run matched the filters.
    NoRuns { checked_at: DateTime<Utc> },
    /// Latest poll succeeded.
    Run(TrackedRun),
    /// Latest poll failed transiently; the previous data is kept as-is.
    Stale {
        last: Option<TrackedRun>,
        error: String,
        failed_at: DateTime<Utc>,
    },
    /// Polling stopped until the configuration changes.
    Errored {
        cause: PermanentCause,
        failed_at: DateTime<Utc>,
    },
}

impl PartialEq for TargetEntry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TargetEntry::NoRuns { .. }, TargetEntry::NoRuns { .. }) => true,
            (TargetEntry::Run(a), TargetEntry::Run(b)) => a == b,
            (
                TargetEntry::Stale { last: a, error: ea, .. },
                TargetEntry::Stale { last: b, error: eb, .. },
            ) => a == b && ea == eb,
            (TargetEntry::Errored { cause: a, .. }, TargetEntry::Errored { cause: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl TargetEntry {
    /// The run to show and navigate from, fresh or stale.
    pub fn run(&self) -> Option<&WorkflowRun> {
        self.tracked().map(|t| &t.run)
    }

    pub fn tracked(&self) -> Option<&TrackedRun> {
        match self {
            TargetEntry::Run(tracked) => Some(tracked),
            TargetEntry::Stale { last, .. } => last.as_ref(),
            TargetEntry::NoRuns { .. } | TargetEntry::Errored { .. } => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            TargetEntry::Stale { error, .. } => Some(error.clone()),
            TargetEntry::Errored { cause, .. } => Some(cause.to_string()),
            TargetEntry::NoRuns { .. } | TargetEntry::Run(_) => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, TargetEntry::Stale { .. })
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, TargetEntry::Errored { .. })
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            TargetEntry::NoRuns { .. } => "no runs".to_string(),
            TargetEntry::Run(tracked) => {
                format!("run {} {}", tracked.run.id, tracked.run.status.as_str())
            }
            TargetEntry::Stale { last, error, .. } => match last {
                Some(tracked) => format!("stale run {} ({})", tracked.run.id, error),
                None => format!("stale ({})", error),
            },
            TargetEntry::Errored { cause, .. } => format!("errored ({})", cause),
        }
    }
}

/// Every target's entry at one point in time.
///
/// A target with no entry has not completed a poll yet.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    pub published_at: Option<DateTime<Utc>>,
    targets: Vec<MonitorTarget>,
    entries: HashMap<MonitorTarget, TargetEntry>,
}

impl Snapshot {
    pub fn new(
        generation: u64,
        published_at: DateTime<Utc>,
        targets: Vec<MonitorTarget>,
        entries: HashMap<MonitorTarget, TargetEntry>,
    ) -> Self {
        Self {
            generation,
            published_at: Some(published_at),
            targets,
            entries,
        }
    }

    /// Targets in configuration order.
    pub fn targets(&self) -> &[MonitorTarget] {
        &self.targets
    }

    pub fn get(&self, target: &MonitorTarget) -> Option<&TargetEntry> {
        self.entries.get(target)
    }

    /// Each target with its entry, in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&MonitorTarget, Option<&TargetEntry>)> {
        self.targets.iter().map(|t| (t, self.entries.get(t)))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets whose entry differs from `previous`, in configuration order.
    pub fn changed_targets(&self, previous: &Snapshot) -> Vec<&MonitorTarget> {
        self.targets
            .iter()
            .filter(|t| self.entries.get(*t) != previous.entries.get(*t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::run;

    fn tracked(id: u64) -> TrackedRun {
        TrackedRun {
            run: run(id),
            last_completed: Some(Status::Success),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_accessors() {
        let fresh = TargetEntry::Run(tracked(1));
        assert_eq!(fresh.run().map(|r| r.id), Some(1));
        assert!(fresh.error().is_none());

        let stale = TargetEntry::Stale {
            last: Some(tracked(1)),
            error: "timed out".to_string(),
            failed_at: Utc::now(),
        };
        assert_eq!(stale.run().map(|r| r.id), Some(1));
        assert_eq!(stale.error().as_deref(), Some("timed out"));
        assert!(stale.is_stale());

        let errored = TargetEntry::Errored {
            cause: PermanentCause::Unauthorized,
            failed_at: Utc::now(),
        };
        assert!(errored.run().is_none());
        assert!(errored.is_errored());
    }

    #[test]
    fn test_iter_keeps_config_order_and_gaps() {
        let a = MonitorTarget::new("acme", "widgets");
        let b = MonitorTarget::new("acme", "gadgets");
        let mut entries = HashMap::new();
        entries.insert(b.clone(), TargetEntry::Run(tracked(2)));
        let snapshot = Snapshot::new(1, Utc::now(), vec![a.clone(), b.clone()], entries);

        let seen: Vec<_> = snapshot.iter().map(|(t, e)| (t.clone(), e.is_some())).collect();
        assert_eq!(seen, vec![(a, false), (b, true)]);
    }

    #[test]
    fn test_changed_targets() {
        let a = MonitorTarget::new("acme", "widgets");
        let b = MonitorTarget::new("acme", "gadgets");
        let first = tracked(1);

        let mut before = HashMap::new();
        before.insert(a.clone(), TargetEntry::Run(first.clone()));
        before.insert(b.clone(), TargetEntry::Run(tracked(2)));
        let previous = Snapshot::new(1, Utc::now(), vec![a.clone(), b.clone()], before.clone());

        let mut after = before;
        after.insert(b.clone(), TargetEntry::Run(tracked(3)));
        let current = Snapshot::new(2, Utc::now(), vec![a.clone(), b.clone()], after);

        assert_eq!(current.changed_targets(&previous), vec![&b]);
    }

    #[test]
    fn test_repolling_the_same_run_is_not_a_change() {
        let a = MonitorTarget::new("acme", "widgets");
        let earlier = TrackedRun {
            checked_at: Utc::now() - chrono::Duration::seconds(60),
            ..tracked(1)
        };

        let mut before = HashMap::new();
        before.insert(a.clone(), TargetEntry::Run(earlier));
        let previous = Snapshot::new(1, Utc::now(), vec![a.clone()], before);

        let mut after = HashMap::new();
        after.insert(a.clone(), TargetEntry::Run(tracked(1)));
        let current = Snapshot::new(2, Utc::now(), vec![a.clone()], after);

        assert!(current.changed_targets(&previous).is_empty());
    }
}
