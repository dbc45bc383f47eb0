// Traffic-light indicators.
// Maps snapshot entries to a severity and raises notices on overall transitions.

use crate::model::Status;
use crate::snapshot::{Snapshot, TargetEntry};

/// Severity of one target, or of all of them. Later variants are worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    NoRuns,
    Ok,
    RunningFromOk,
    RunningFromFailed,
    Failed,
    Disconnected,
}

impl Indicator {
    pub fn of(entry: &TargetEntry) -> Self {
        match entry {
            TargetEntry::NoRuns { .. } => Indicator::NoRuns,
            TargetEntry::Stale { .. } | TargetEntry::Errored { .. } => Indicator::Disconnected,
            TargetEntry::Run(tracked) => {
                if tracked.run.status.is_completed() {
                    if tracked.run.status == Status::Success {
                        Indicator::Ok
                    } else {
                        Indicator::Failed
                    }
                } else {
                    match tracked.last_completed {
                        Some(Status::Success) | None => Indicator::RunningFromOk,
                        Some(_) => Indicator::RunningFromFailed,
                    }
                }
            }
        }
    }

    /// Worst indicator across every polled target.
    pub fn overall(snapshot: &Snapshot) -> Self {
        snapshot
            .iter()
            .filter_map(|(_, entry)| entry.map(Indicator::of))
            .max()
            .unwrap_or(Indicator::NoRuns)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Indicator::NoRuns => "⚪",
            Indicator::Ok => "🟢",
            Indicator::RunningFromOk => "🔵",
            Indicator::RunningFromFailed => "🟠",
            Indicator::Failed => "🔴",
            Indicator::Disconnected => "⚫",
        }
    }
}

/// Something worth telling the user about an overall transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NetworkError,
    WorkflowFailure,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::NetworkError => "Network error: unable to reach GitHub",
            Notice::WorkflowFailure => "Workflow failure: a monitored run did not succeed",
        }
    }
}

/// Notice raised by moving from `previous` to `current`, if any.
pub fn notice(previous: Indicator, current: Indicator) -> Option<Notice> {
    if previous == current {
        return None;
    }
    if current == Indicator::Disconnected {
        return Some(Notice::NetworkError);
    }
    let was_green = matches!(previous, Indicator::Ok | Indicator::RunningFromOk);
    if was_green && current > previous && current != Indicator::RunningFromOk {
        return Some(Notice::WorkflowFailure);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PermanentCause;
    use crate::model::fixtures::run;
    use crate::snapshot::TrackedRun;
    use crate::target::MonitorTarget;
    use chrono::Utc;
    use std::collections::HashMap;

    fn entry(status: Status, last_completed: Option<Status>) -> TargetEntry {
        let mut latest = run(1);
        latest.status = status;
        TargetEntry::Run(TrackedRun {
            run: latest,
            last_completed,
            checked_at: Utc::now(),
        })
    }

    #[test]
    fn test_indicator_per_entry() {
        assert_eq!(Indicator::of(&entry(Status::Success, Some(Status::Success))), Indicator::Ok);
        assert_eq!(Indicator::of(&entry(Status::Failure, Some(Status::Failure))), Indicator::Failed);
        assert_eq!(Indicator::of(&entry(Status::Cancelled, Some(Status::Cancelled))), Indicator::Failed);
        assert_eq!(Indicator::of(&entry(Status::InProgress, None)), Indicator::RunningFromOk);
        assert_eq!(
            Indicator::of(&entry(Status::Queued, Some(Status::Success))),
            Indicator::RunningFromOk
        );
        assert_eq!(
            Indicator::of(&entry(Status::InProgress, Some(Status::Failure))),
            Indicator::RunningFromFailed
        );
        assert_eq!(
            Indicator::of(&TargetEntry::NoRuns { checked_at: Utc::now() }),
            Indicator::NoRuns
        );
        assert_eq!(
            Indicator::of(&TargetEntry::Errored {
                cause: PermanentCause::Unauthorized,
                failed_at: Utc::now(),
            }),
            Indicator::Disconnected
        );
    }

    #[test]
    fn test_overall_is_worst_polled_entry() {
        let a = MonitorTarget::new("acme", "widgets");
        let b = MonitorTarget::new("acme", "gadgets");
        let c = MonitorTarget::new("acme", "gizmos");

        let empty = Snapshot::new(1, Utc::now(), vec![a.clone()], HashMap::new());
        assert_eq!(Indicator::overall(&empty), Indicator::NoRuns);

        let mut entries = HashMap::new();
        entries.insert(a.clone(), entry(Status::Success, Some(Status::Success)));
        entries.insert(b.clone(), entry(Status::InProgress, Some(Status::Failure)));
        let snapshot = Snapshot::new(2, Utc::now(), vec![a, b, c], entries);
        assert_eq!(Indicator::overall(&snapshot), Indicator::RunningFromFailed);
    }

    #[test]
    fn test_notices() {
        assert_eq!(notice(Indicator::Ok, Indicator::Failed), Some(Notice::WorkflowFailure));
        assert_eq!(
            notice(Indicator::RunningFromOk, Indicator::RunningFromFailed),
            Some(Notice::WorkflowFailure)
        );
        assert_eq!(notice(Indicator::Ok, Indicator::RunningFromOk), None);
        assert_eq!(notice(Indicator::Failed, Indicator::Ok), None);
        assert_eq!(notice(Indicator::Failed, Indicator::Failed), None);
        assert_eq!(notice(Indicator::Failed, Indicator::Disconnected), Some(Notice::NetworkError));
        assert_eq!(notice(Indicator::NoRuns, Indicator::Failed), None);
    }
}
