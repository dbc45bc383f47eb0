// Status aggregator.
// Merges per-target poll reports and publishes each result as a new snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::error::PermanentCause;
use crate::snapshot::{Snapshot, TargetEntry, TrackedRun};
use crate::target::MonitorTarget;

/// Result of one poll, as decided by the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Latest(TrackedRun),
    NoRuns,
    Transient(String),
    Permanent(PermanentCause),
}

/// A poll result tagged with the poller that produced it.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub target: MonitorTarget,
    /// Identifies the poller instance; reports from cancelled pollers are dropped.
    pub poller_id: u64,
    pub outcome: PollOutcome,
    pub at: DateTime<Utc>,
}

/// Messages the aggregator consumes.
#[derive(Debug, Clone)]
pub enum AggregatorMsg {
    Report(PollReport),
    /// The active targets in display order, with their current poller ids.
    Targets(Vec<(MonitorTarget, u64)>),
}

/// Read side of the published snapshot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotReader {
    /// The latest complete snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// Wait for the next publish. `None` once the aggregator has stopped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}

/// Owns the merged per-target state and the publish side of the snapshot.
pub struct Aggregator {
    targets: Vec<(MonitorTarget, u64)>,
    entries: HashMap<MonitorTarget, TargetEntry>,
    generation: u64,
    tx: watch::Sender<Arc<Snapshot>>,
}

impl Aggregator {
    pub fn new() -> (Self, SnapshotReader) {
        let (tx, rx) = watch::channel(Arc::new(Snapshot::default()));
        (
            Self {
                targets: Vec::new(),
                entries: HashMap::new(),
                generation: 0,
                tx,
            },
            SnapshotReader { rx },
        )
    }

    fn poller_id(&self, target: &MonitorTarget) -> Option<u64> {
        self.targets
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, id)| *id)
    }

    /// Fold one message into the state. Returns true if anything changed.
    pub fn apply(&mut self, msg: AggregatorMsg) -> bool {
        match msg {
            AggregatorMsg::Targets(targets) => {
                // Entries survive only while the same poller still owns the target.
                let keep: HashMap<&MonitorTarget, u64> =
                    targets.iter().map(|(t, id)| (t, *id)).collect();
                let previous: HashMap<MonitorTarget, u64> = self.targets.drain(..).collect();
                self.entries.retain(|t, _| {
                    keep.get(t).is_some_and(|id| previous.get(t) == Some(id))
                });
                self.targets = targets;
                true
            }
            AggregatorMsg::Report(report) => {
                if self.poller_id(&report.target) != Some(report.poller_id) {
                    tracing::trace!(monitor = %report.target, "dropping report from retired poller");
                    return false;
                }
                let previous = self.entries.get(&report.target);
                let next = merge(previous, report.outcome, report.at);
                let changed = previous != Some(&next);
                if changed && previous.map(TargetEntry::describe) != Some(next.describe()) {
                    tracing::info!(monitor = %report.target, entry = %next.describe(), "target status changed");
                }
                // Fresher timestamps are kept but only ride along with the next real change.
                self.entries.insert(report.target, next);
                changed
            }
        }
    }

    /// Replace the published snapshot with the current state.
    pub fn publish(&mut self) {
        self.generation += 1;
        let snapshot = Snapshot::new(
            self.generation,
            Utc::now(),
            self.targets.iter().map(|(t, _)| t.clone()).collect(),
            self.entries.clone(),
        );
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// Consume messages until every sender is gone, publishing once per batch.
    pub async fn run(mut self, mut rx: mpsc::Receiver<AggregatorMsg>) {
        while let Some(msg) = rx.recv().await {
            let mut changed = self.apply(msg);
            while let Ok(msg) = rx.try_recv() {
                changed |= self.apply(msg);
            }
            if changed {
                self.publish();
            }
        }
        tracing::debug!("aggregator stopped");
    }
}

/// Merge a poll outcome into a target's previous entry.
pub fn merge(previous: Option<&TargetEntry>, outcome: PollOutcome, at: DateTime<Utc>) -> TargetEntry {
    match outcome {
        PollOutcome::Latest(tracked) => TargetEntry::Run(tracked),
        PollOutcome::NoRuns => TargetEntry::NoRuns { checked_at: at },
        PollOutcome::Transient(error) => TargetEntry::Stale {
            last: previous.and_then(TargetEntry::tracked).cloned(),
            error,
            failed_at: at,
        },
        PollOutcome::Permanent(cause) => TargetEntry::Errored {
            cause,
            failed_at: at,
        },
    }
}
