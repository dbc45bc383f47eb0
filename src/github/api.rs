// Trait seam between the pollers and the GitHub client.
// Pollers and the action resolver only see this; tests substitute fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::WorkflowRun;
use crate::target::RunQuery;

use super::client::GitHubClient;

#[async_trait]
pub trait ActionsApi: Send + Sync {
    /// Runs matching the query, newest first. Runs the API reports without a
    /// branch or actor are left out.
    async fn list_workflow_runs(&self, query: &RunQuery) -> Result<Vec<WorkflowRun>>;

    /// Rerun only the failed jobs of a run, addressed by its rerun URL.
    async fn rerun_failed_jobs(&self, rerun_url: &str) -> Result<()>;
}

#[async_trait]
impl ActionsApi for GitHubClient {
    async fn list_workflow_runs(&self, query: &RunQuery) -> Result<Vec<WorkflowRun>> {
        let api_base = self.options().api_base.clone();
        let runs = self.get_workflow_runs(query).await?;
        Ok(runs
            .into_iter()
            .filter_map(|run| {
                let id = run.id;
                let converted = WorkflowRun::from_api(run, &api_base);
                if converted.is_none() {
                    tracing::debug!(run_id = id, "skipping run without branch or actor");
                }
                converted
            })
            .collect())
    }

    async fn rerun_failed_jobs(&self, rerun_url: &str) -> Result<()> {
        self.post_rerun_failed_jobs(rerun_url).await
    }
}
