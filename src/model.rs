// Domain model for monitored workflow runs.
// Converts raw API runs into fully-populated runs with a flattened status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::endpoints::rerun_failed_jobs_url;
use crate::github::types::{ApiWorkflowRun, RunConclusion, RunStatus};

/// Run status as shown to the user, combining API status and conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    InProgress,
    Success,
    Failure,
    Cancelled,
    Skipped,
    Unknown,
}

impl Status {
    pub fn from_api(status: Option<RunStatus>, conclusion: Option<RunConclusion>) -> Self {
        match status {
            Some(RunStatus::Queued | RunStatus::Waiting | RunStatus::Requested | RunStatus::Pending) => {
                Status::Queued
            }
            Some(RunStatus::InProgress) => Status::InProgress,
            Some(RunStatus::Completed) => match conclusion {
                Some(RunConclusion::Success | RunConclusion::Neutral) => Status::Success,
                Some(
                    RunConclusion::Failure
                    | RunConclusion::TimedOut
                    | RunConclusion::StartupFailure
                    | RunConclusion::ActionRequired,
                ) => Status::Failure,
                Some(RunConclusion::Cancelled) => Status::Cancelled,
                Some(RunConclusion::Skipped | RunConclusion::Stale) => Status::Skipped,
                Some(RunConclusion::Unknown) | None => Status::Unknown,
            },
            Some(RunStatus::Unknown) | None => Status::Unknown,
        }
    }

    /// Whether the run has finished (successfully or not).
    pub fn is_completed(&self) -> bool {
        !matches!(self, Status::Queued | Status::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::InProgress => "in_progress",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Cancelled => "cancelled",
            Status::Skipped => "skipped",
            Status::Unknown => "unknown",
        }
    }
}

/// Owner and name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive comparison, as GitHub treats owner and repo names.
    pub fn same_as(&self, owner: &str, name: &str) -> bool {
        self.owner.eq_ignore_ascii_case(owner) && self.name.eq_ignore_ascii_case(name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The workflow a run belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub id: u64,
    /// File name within `.github/workflows/`, when the API reports a path.
    pub file: Option<String>,
    pub name: String,
}

impl WorkflowRef {
    /// Whether a configured workflow filter (file name, path or numeric id) names this workflow.
    pub fn matches(&self, filter: &str) -> bool {
        if filter == self.id.to_string() {
            return true;
        }
        match &self.file {
            Some(file) => {
                file == filter || filter.rsplit('/').next().is_some_and(|tail| tail == file)
            }
            None => false,
        }
    }
}

/// User who triggered a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
    pub html_url: String,
}

/// A fully-populated workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub run_number: u64,
    pub repo: RepoRef,
    /// Web URL of the repository.
    pub repo_url: String,
    pub workflow: WorkflowRef,
    pub branch: String,
    pub actor: Actor,
    pub status: Status,
    pub event: String,
    pub commit_sha: String,
    /// Web URL of the run.
    pub html_url: String,
    /// API URL to rerun failed jobs, only present when the run failed.
    pub rerun_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Build a domain run from an API run.
    ///
    /// Returns `None` when the API omits a field the domain requires
    /// (head branch or actor), so a run is never partially populated.
    pub fn from_api(run: ApiWorkflowRun, api_base: &str) -> Option<Self> {
        let branch = run.head_branch?;
        let account = run.actor.or(run.triggering_actor)?;
        let owner = run.repository.owner.login;
        let repo_url = run.repository.html_url;
        let actor_url = account.html_url.unwrap_or_else(|| {
            let web_base = repo_url
                .strip_suffix(&format!("/{}/{}", owner, run.repository.name))
                .unwrap_or("https://github.com");
            format!("{}/{}", web_base, account.login)
        });

        let status = Status::from_api(run.status, run.conclusion);
        let rerun_url = (status == Status::Failure).then(|| match &run.rerun_url {
            Some(url) => format!("{}-failed-jobs", url),
            None => rerun_failed_jobs_url(api_base, &owner, &run.repository.name, run.id),
        });

        let file = run
            .path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        Some(Self {
            id: run.id,
            run_number: run.run_number,
            repo: RepoRef::new(owner, run.repository.name),
            repo_url,
            workflow: WorkflowRef {
                id: run.workflow_id,
                file,
                name: run.name.unwrap_or_else(|| run.workflow_id.to_string()),
            },
            branch,
            actor: Actor {
                login: account.login,
                html_url: actor_url,
            },
            status,
            event: run.event,
            commit_sha: run.head_sha,
            html_url: run.html_url,
            rerun_url,
            started_at: run.run_started_at.unwrap_or(run.created_at),
            updated_at: run.updated_at,
        })
    }

    /// Web URL of the commit the run was triggered for.
    pub fn commit_url(&self) -> String {
        format!("{}/commit/{}", self.repo_url, self.commit_sha)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{Account, AccountType, RepositoryRef};

    fn api_run() -> ApiWorkflowRun {
        let at = Utc::now();
        ApiWorkflowRun {
            id: 42,
            name: Some("CI".to_string()),
            path: Some(".github/workflows/ci.yml".to_string()),
            workflow_id: 7,
            run_number: 3,
            run_attempt: Some(1),
            event: "push".to_string(),
            status: Some(RunStatus::Completed),
            conclusion: Some(RunConclusion::Failure),
            head_branch: Some("main".to_string()),
            head_sha: "abc123".to_string(),
            actor: Some(Account {
                login: "octocat".to_string(),
                account_type: AccountType::User,
                html_url: None,
            }),
            triggering_actor: None,
            repository: RepositoryRef {
                name: "widgets".to_string(),
                full_name: "acme/widgets".to_string(),
                owner: Account {
                    login: "acme".to_string(),
                    account_type: AccountType::Organization,
                    html_url: None,
                },
                html_url: "https://github.com/acme/widgets".to_string(),
            },
            html_url: "https://github.com/acme/widgets/actions/runs/42".to_string(),
            rerun_url: Some("https://api.github.com/repos/acme/widgets/actions/runs/42/rerun".to_string()),
            created_at: at,
            updated_at: at,
            run_started_at: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Status::from_api(Some(RunStatus::Waiting), None), Status::Queued);
        assert_eq!(Status::from_api(Some(RunStatus::InProgress), None), Status::InProgress);
        assert_eq!(
            Status::from_api(Some(RunStatus::Completed), Some(RunConclusion::TimedOut)),
            Status::Failure
        );
        assert_eq!(
            Status::from_api(Some(RunStatus::Completed), Some(RunConclusion::Skipped)),
            Status::Skipped
        );
        assert_eq!(Status::from_api(Some(RunStatus::Completed), None), Status::Unknown);
        assert!(!Status::InProgress.is_completed());
        assert!(Status::Cancelled.is_completed());
    }

    #[test]
    fn test_from_api_failed_run_has_rerun_url() {
        let run = WorkflowRun::from_api(api_run(), "https://api.github.com").unwrap();
        assert_eq!(run.status, Status::Failure);
        assert_eq!(
            run.rerun_url.as_deref(),
            Some("https://api.github.com/repos/acme/widgets/actions/runs/42/rerun-failed-jobs")
        );
        assert_eq!(run.actor.html_url, "https://github.com/octocat");
        assert_eq!(run.workflow.file.as_deref(), Some("ci.yml"));
        assert_eq!(run.commit_url(), "https://github.com/acme/widgets/commit/abc123");
    }

    #[test]
    fn test_from_api_successful_run_has_no_rerun_url() {
        let mut api = api_run();
        api.conclusion = Some(RunConclusion::Success);
        let run = WorkflowRun::from_api(api, "https://api.github.com").unwrap();
        assert!(run.rerun_url.is_none());
    }

    #[test]
    fn test_from_api_rejects_incomplete_runs() {
        let mut api = api_run();
        api.head_branch = None;
        assert!(WorkflowRun::from_api(api, "https://api.github.com").is_none());

        let mut api = api_run();
        api.actor = None;
        assert!(WorkflowRun::from_api(api, "https://api.github.com").is_none());
    }

    #[test]
    fn test_workflow_filter_matching() {
        let wf = WorkflowRef {
            id: 7,
            file: Some("ci.yml".to_string()),
            name: "CI".to_string(),
        };
        assert!(wf.matches("ci.yml"));
        assert!(wf.matches(".github/workflows/ci.yml"));
        assert!(wf.matches("7"));
        assert!(!wf.matches("release.yml"));
        assert!(!wf.matches("CI"));
    }
}
