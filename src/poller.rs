// Per-target poller.
// Fetches the latest matching run on a fixed interval and reports to the aggregator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{AggregatorMsg, PollOutcome, PollReport};
use crate::config::{DEFAULT_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, MonitorConfig};
use crate::error::StatusError;
use crate::github::ActionsApi;
use crate::github::client::DEFAULT_PER_PAGE;
use crate::model::WorkflowRun;
use crate::snapshot::TrackedRun;
use crate::target::MonitorTarget;

/// Timing shared by every poller. A change restarts all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Upper bound on one listing call, so a stalled request cannot hold a target.
    pub timeout: Duration,
    pub per_page: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PollerSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            timeout: config.request_timeout(),
            ..Self::default()
        }
    }
}

/// What the loop does after one poll.
enum Next {
    /// Sleep the normal interval.
    Wait,
    /// Make no calls before this instant.
    Defer(DateTime<Utc>),
    Stop,
}

pub struct Poller {
    pub id: u64,
    pub target: MonitorTarget,
    api: Arc<dyn ActionsApi>,
    settings: PollerSettings,
    reports: mpsc::Sender<AggregatorMsg>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        id: u64,
        target: MonitorTarget,
        api: Arc<dyn ActionsApi>,
        settings: PollerSettings,
        reports: mpsc::Sender<AggregatorMsg>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            target,
            api,
            settings,
            reports,
            cancel,
        }
    }

    /// Poll until cancelled, or until a permanent error ends polling for this target.
    pub async fn run(self) {
        tracing::debug!(monitor = %self.target, poller_id = self.id, "poller started");
        loop {
            let next = match self.poll_once().await {
                Some(next) => next,
                None => break,
            };
            let pause = match next {
                Next::Wait => self.settings.interval,
                Next::Defer(reset_at) => {
                    // A reset at or behind our clock means the gate has nothing to wait for.
                    let wait = (reset_at - Utc::now())
                        .to_std()
                        .ok()
                        .filter(|wait| !wait.is_zero())
                        .unwrap_or(self.settings.interval);
                    tracing::info!(
                        monitor = %self.target,
                        reset_at = %reset_at,
                        "rate limited, deferring poll"
                    );
                    wait
                }
                Next::Stop => {
                    tracing::warn!(monitor = %self.target, "polling stopped until configuration changes");
                    break;
                }
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::debug!(monitor = %self.target, poller_id = self.id, "poller finished");
    }

    /// One request and its report. `None` when cancelled mid-flight.
    async fn poll_once(&self) -> Option<Next> {
        let query = self.target.query(self.settings.per_page);
        let call = tokio::time::timeout(self.settings.timeout, self.api.list_workflow_runs(&query));

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            result = call => result,
        };

        let (outcome, next) = match result {
            Err(_) => (
                PollOutcome::Transient(format!(
                    "request timed out after {}s",
                    self.settings.timeout.as_secs()
                )),
                Next::Wait,
            ),
            Ok(Ok(runs)) => (select_latest(&self.target, &runs, Utc::now()), Next::Wait),
            Ok(Err(StatusError::RateLimited { reset_at })) => return Some(Next::Defer(reset_at)),
            Ok(Err(StatusError::Permanent(cause))) => {
                tracing::error!(monitor = %self.target, error = %cause, "permanent poll failure");
                (PollOutcome::Permanent(cause), Next::Stop)
            }
            Ok(Err(e)) => {
                tracing::warn!(monitor = %self.target, error = %e, "poll failed");
                (PollOutcome::Transient(e.to_string()), Next::Wait)
            }
        };

        let report = PollReport {
            target: self.target.clone(),
            poller_id: self.id,
            outcome,
            at: Utc::now(),
        };
        if self.reports.send(AggregatorMsg::Report(report)).await.is_err() {
            // Aggregator gone; nothing left to report to.
            return None;
        }
        Some(next)
    }
}

/// Pick the newest run matching `target` from a newest-first listing.
///
/// While that run is still going, the newest completed matching run after it
/// supplies `last_completed`.
pub fn select_latest(target: &MonitorTarget, runs: &[WorkflowRun], now: DateTime<Utc>) -> PollOutcome {
    let mut matching = runs.iter().filter(|run| target.matches(run));
    let Some(latest) = matching.next() else {
        return PollOutcome::NoRuns;
    };
    let last_completed = if latest.status.is_completed() {
        Some(latest.status)
    } else {
        matching
            .find(|run| run.status.is_completed())
            .map(|run| run.status)
    };
    PollOutcome::Latest(TrackedRun {
        run: latest.clone(),
        last_completed,
        checked_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PermanentCause, Result};
    use crate::model::Status;
    use crate::model::fixtures::run;
    use crate::target::RunQuery;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<WorkflowRun>>>>,
        calls: Mutex<Vec<RunQuery>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Vec<WorkflowRun>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ActionsApi for Scripted {
        async fn list_workflow_runs(&self, query: &RunQuery) -> Result<Vec<WorkflowRun>> {
            self.calls.lock().unwrap().push(query.clone());
            let reply = self.replies.lock().unwrap().pop_front();
            reply.unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn rerun_failed_jobs(&self, _rerun_url: &str) -> Result<()> {
            Ok(())
        }
    }

    fn with_status(id: u64, status: Status) -> WorkflowRun {
        WorkflowRun { status, ..run(id) }
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            per_page: 10,
        }
    }

    #[test]
    fn test_select_latest_uses_first_match() {
        let target = MonitorTarget::new("acme", "widgets").with_branch("main");
        let mut other_branch = with_status(3, Status::Failure);
        other_branch.branch = "feature".to_string();
        let runs = vec![other_branch, with_status(2, Status::Success), with_status(1, Status::Failure)];

        match select_latest(&target, &runs, Utc::now()) {
            PollOutcome::Latest(tracked) => {
                assert_eq!(tracked.run.id, 2);
                assert_eq!(tracked.last_completed, Some(Status::Success));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_select_latest_running_carries_previous_conclusion() {
        let target = MonitorTarget::new("acme", "widgets");
        let runs = vec![
            with_status(3, Status::InProgress),
            with_status(2, Status::Queued),
            with_status(1, Status::Failure),
        ];

        match select_latest(&target, &runs, Utc::now()) {
            PollOutcome::Latest(tracked) => {
                assert_eq!(tracked.run.id, 3);
                assert_eq!(tracked.last_completed, Some(Status::Failure));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_select_latest_no_match() {
        let target = MonitorTarget::new("acme", "widgets").with_actor("hubot");
        assert_eq!(select_latest(&target, &[run(1)], Utc::now()), PollOutcome::NoRuns);
        assert_eq!(select_latest(&target, &[], Utc::now()), PollOutcome::NoRuns);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_polling() {
        let api = Scripted::new(vec![Err(StatusError::Permanent(PermanentCause::NotFound(
            "/repos/acme/widgets/actions/runs".into(),
        )))]);
        let (tx, mut rx) = mpsc::channel(8);
        let poller = Poller::new(
            1,
            MonitorTarget::new("acme", "widgets"),
            api.clone(),
            settings(),
            tx,
            CancellationToken::new(),
        );

        poller.run().await;

        match rx.recv().await {
            Some(AggregatorMsg::Report(report)) => {
                assert!(matches!(report.outcome, PollOutcome::Permanent(_)));
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_defers_without_report() {
        let reset_at = Utc::now() + chrono::Duration::seconds(600);
        let api = Scripted::new(vec![Err(StatusError::RateLimited { reset_at })]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            1,
            MonitorTarget::new("acme", "widgets"),
            api.clone(),
            settings(),
            tx,
            cancel.clone(),
        );
        let task = tokio::spawn(poller.run());

        // Well past the normal interval, still inside the rate-limit window.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(api.call_count(), 1);
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_reset_waits_the_interval() {
        let reset_at = Utc::now() - chrono::Duration::seconds(2);
        let api = Scripted::new(vec![
            Err(StatusError::RateLimited { reset_at }),
            Err(StatusError::RateLimited { reset_at }),
            Err(StatusError::RateLimited { reset_at }),
        ]);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            1,
            MonitorTarget::new("acme", "widgets"),
            api.clone(),
            settings(),
            tx,
            cancel.clone(),
        );
        let task = tokio::spawn(poller.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(api.call_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.call_count(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_reports_and_retries() {
        let api = Scripted::new(vec![
            Err(StatusError::Transient("HTTP 502".into())),
            Ok(vec![run(9)]),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            4,
            MonitorTarget::new("acme", "widgets"),
            api.clone(),
            settings(),
            tx,
            cancel.clone(),
        );
        let task = tokio::spawn(poller.run());

        let first = rx.recv().await;
        assert!(matches!(
            first,
            Some(AggregatorMsg::Report(PollReport { outcome: PollOutcome::Transient(_), poller_id: 4, .. }))
        ));
        let second = rx.recv().await;
        assert!(matches!(
            second,
            Some(AggregatorMsg::Report(PollReport { outcome: PollOutcome::Latest(_), .. }))
        ));
        assert_eq!(api.call_count(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_sleeping_poller() {
        let api = Scripted::new(vec![Ok(vec![run(1)])]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let poller = Poller::new(
            1,
            MonitorTarget::new("acme", "widgets"),
            api.clone(),
            settings(),
            tx,
            cancel.clone(),
        );
        let task = tokio::spawn(poller.run());
        assert!(rx.recv().await.is_some());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(api.call_count(), 1);
    }
}
