#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use actions_status::aggregator::SnapshotReader;
use actions_status::error::{Result, StatusError};
use actions_status::github::ActionsApi;
use actions_status::model::{Actor, RepoRef, Status, WorkflowRef, WorkflowRun};
use actions_status::snapshot::Snapshot;
use actions_status::target::RunQuery;

/// One scripted answer to a listing call.
pub enum Reply {
    Runs(Vec<WorkflowRun>),
    Fail(StatusError),
    /// Never answers; only the poller's timeout ends the call.
    Stall,
}

/// In-memory stand-in for GitHub, scripted per repository.
///
/// Once a repository's script runs out, its last successful listing repeats.
#[derive(Default)]
pub struct FakeActions {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    last: Mutex<HashMap<String, Vec<WorkflowRun>>>,
    calls: Mutex<Vec<(String, tokio::time::Instant)>>,
    reruns: Mutex<Vec<String>>,
}

impl FakeActions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, repo: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn calls_for(&self, repo: &str) -> Vec<tokio::time::Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == repo)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn reruns(&self) -> Vec<String> {
        self.reruns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionsApi for FakeActions {
    async fn list_workflow_runs(&self, query: &RunQuery) -> Result<Vec<WorkflowRun>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.repo.clone(), tokio::time::Instant::now()));

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&query.repo)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Runs(runs)) => {
                self.last.lock().unwrap().insert(query.repo.clone(), runs.clone());
                Ok(runs)
            }
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Stall) => std::future::pending::<Result<Vec<WorkflowRun>>>().await,
            None => Ok(self
                .last
                .lock()
                .unwrap()
                .get(&query.repo)
                .cloned()
                .unwrap_or_default()),
        }
    }

    async fn rerun_failed_jobs(&self, rerun_url: &str) -> Result<()> {
        self.reruns.lock().unwrap().push(rerun_url.to_string());
        Ok(())
    }
}

/// A run of the `CI` workflow in `acme/<repo>`.
pub fn run(id: u64, repo: &str, branch: &str, status: Status) -> WorkflowRun {
    let now = Utc::now();
    WorkflowRun {
        id,
        run_number: id,
        repo: RepoRef::new("acme", repo),
        repo_url: format!("https://github.com/acme/{}", repo),
        workflow: WorkflowRef {
            id: 7,
            file: Some("ci.yml".to_string()),
            name: "CI".to_string(),
        },
        branch: branch.to_string(),
        actor: Actor {
            login: "octocat".to_string(),
            html_url: "https://github.com/octocat".to_string(),
        },
        status,
        event: "push".to_string(),
        commit_sha: "abc123".to_string(),
        html_url: format!("https://github.com/acme/{}/actions/runs/{}", repo, id),
        rerun_url: (status == Status::Failure)
            .then(|| format!("https://api.example/runs/{}/rerun-failed-jobs", id)),
        started_at: now,
        updated_at: now,
    }
}

/// Wait (in virtual time) for a published snapshot satisfying `pred`.
pub async fn wait_for(reader: &mut SnapshotReader, pred: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
    let current = reader.current();
    if pred(&current) {
        return current;
    }
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            let snapshot = reader.changed().await.expect("aggregator stopped");
            if pred(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("snapshot condition never reached")
}
