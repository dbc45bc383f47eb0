// GitHub API response types.
// Serde structs for the workflow-runs listing and the OAuth device-flow endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account type discriminator (user, organization or bot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountType {
    #[default]
    User,
    Organization,
    Bot,
    #[serde(other)]
    Unknown,
}

/// GitHub user, bot or organization as embedded in other payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: AccountType,
    pub html_url: Option<String>,
}

/// Repository summary embedded in a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: String,
    pub full_name: String,
    pub owner: Account,
    pub html_url: String,
}

/// Workflow run status as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Workflow run conclusion, present once a run has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

/// GitHub Actions workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiWorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    /// Workflow file path, e.g. `.github/workflows/ci.yml`.
    pub path: Option<String>,
    pub workflow_id: u64,
    pub run_number: u64,
    pub run_attempt: Option<u64>,
    pub event: String,
    pub status: Option<RunStatus>,
    pub conclusion: Option<RunConclusion>,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub actor: Option<Account>,
    pub triggering_actor: Option<Account>,
    pub repository: RepositoryRef,
    pub html_url: String,
    pub rerun_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
}

/// Response wrapper for workflow runs list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunsResponse {
    pub total_count: u64,
    pub workflow_runs: Vec<ApiWorkflowRun>,
}

/// Answer to a device-code request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum seconds between token polls.
    pub interval: u64,
}

/// Answer to a token poll. GitHub replies 200 with either a token or an error code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// New minimum interval, sent with `slow_down`.
    pub interval: Option<u64>,
}
