// Poller scheduler.
// Owns the current configuration and starts or stops pollers as it changes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, AggregatorMsg, SnapshotReader};
use crate::config::MonitorConfig;
use crate::github::ActionsApi;
use crate::poller::{Poller, PollerSettings};
use crate::target::{MonitorTarget, TargetDiff, TargetSet};

const REPORT_BUFFER: usize = 64;

struct PollerHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    api: Arc<dyn ActionsApi>,
    config: MonitorConfig,
    targets: TargetSet,
    settings: PollerSettings,
    pollers: HashMap<MonitorTarget, PollerHandle>,
    reports: mpsc::Sender<AggregatorMsg>,
    aggregator: JoinHandle<()>,
    next_id: u64,
}

impl Scheduler {
    /// Start the aggregator and a poller per target in `config`.
    pub async fn start(api: Arc<dyn ActionsApi>, config: MonitorConfig) -> (Self, SnapshotReader) {
        let (aggregator, reader) = Aggregator::new();
        let (reports, rx) = mpsc::channel(REPORT_BUFFER);
        let aggregator = tokio::spawn(aggregator.run(rx));

        let mut scheduler = Self {
            api,
            settings: PollerSettings::from_config(&config),
            config: MonitorConfig::default(),
            targets: TargetSet::default(),
            pollers: HashMap::new(),
            reports,
            aggregator,
            next_id: 0,
        };
        scheduler.apply(config).await;
        (scheduler, reader)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    /// Replace the configuration, starting and stopping only the delta.
    ///
    /// Unchanged targets keep their poller and timer, except that a target
    /// whose poller stopped on a permanent error is started again. A change to
    /// the interval or timeout restarts every poller.
    pub async fn apply(&mut self, config: MonitorConfig) -> TargetDiff {
        let next = TargetSet::from_config(&config);
        let diff = self.targets.diff(&next);
        let settings = PollerSettings::from_config(&config);

        let restart_all = settings != self.settings;
        if restart_all {
            tracing::info!(
                interval_secs = settings.interval.as_secs(),
                timeout_secs = settings.timeout.as_secs(),
                "poll settings changed, restarting all pollers"
            );
            for target in self.pollers.keys().cloned().collect::<Vec<_>>() {
                self.stop(&target);
            }
            self.settings = settings;
        } else {
            for target in &diff.removed {
                self.stop(target);
            }
            let finished: Vec<MonitorTarget> = self
                .pollers
                .iter()
                .filter(|(_, handle)| handle.task.is_finished())
                .map(|(target, _)| target.clone())
                .collect();
            for target in finished {
                tracing::info!(monitor = %target, "restarting stopped poller");
                self.stop(&target);
            }
        }

        // Ids are assigned before anything is spawned so the aggregator knows
        // every poller before its first report.
        let mut spawn = Vec::new();
        let mut assigned = Vec::with_capacity(next.len());
        for target in next.targets() {
            let id = match self.pollers.get(target) {
                Some(handle) => handle.id,
                None => {
                    self.next_id += 1;
                    spawn.push((target.clone(), self.next_id));
                    self.next_id
                }
            };
            assigned.push((target.clone(), id));
        }

        if self.reports.send(AggregatorMsg::Targets(assigned)).await.is_err() {
            tracing::error!("aggregator is gone, cannot apply configuration");
        }

        for (target, id) in spawn {
            self.spawn(target, id);
        }

        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "configuration applied"
        );
        self.targets = next;
        self.config = config;
        diff
    }

    fn spawn(&mut self, target: MonitorTarget, id: u64) {
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            id,
            target.clone(),
            Arc::clone(&self.api),
            self.settings,
            self.reports.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(poller.run());
        self.pollers.insert(target, PollerHandle { id, cancel, task });
    }

    fn stop(&mut self, target: &MonitorTarget) {
        if let Some(handle) = self.pollers.remove(target) {
            tracing::debug!(monitor = %target, poller_id = handle.id, "stopping poller");
            handle.cancel.cancel();
        }
    }

    /// Cancel every poller and wait for the aggregator to drain.
    pub async fn shutdown(mut self) {
        let handles: Vec<PollerHandle> = self.pollers.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
        drop(self.reports);
        let _ = self.aggregator.await;
    }
}
