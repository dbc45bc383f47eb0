// GitHub API endpoint functions.
// Workflow-run listing, rerun-failed-jobs and the OAuth device-flow endpoints.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH};

use crate::error::{Result, StatusError};
use crate::target::RunQuery;

use super::client::{CachedPage, GitHubClient};
use super::types::{AccessTokenResponse, ApiWorkflowRun, DeviceCodeResponse, WorkflowRunsResponse};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// API URL that reruns only the failed jobs of a run.
pub fn rerun_failed_jobs_url(api_base: &str, owner: &str, repo: &str, run_id: u64) -> String {
    format!(
        "{}/repos/{}/{}/actions/runs/{}/rerun-failed-jobs",
        api_base, owner, repo, run_id
    )
}

impl GitHubClient {
    /// Get workflow runs matching a query, newest first.
    ///
    /// Sends `If-None-Match` when the same query was answered before and
    /// replays the remembered runs on `304 Not Modified`.
    pub async fn get_workflow_runs(&self, query: &RunQuery) -> Result<Vec<ApiWorkflowRun>> {
        let key = query.cache_key();
        let cached = self.cached_page(&key);

        let url = self.api_url(&query.path())?;
        let mut request = self.http().get(&url).query(&query.params());
        if let Some(page) = &cached {
            request = request.header(IF_NONE_MATCH, page.etag.as_str());
        }

        let response = self.send(request).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(page) => {
                    tracing::debug!(query = %key, "no updates detected");
                    Ok(page.runs)
                }
                None => {
                    self.store_page(key, None);
                    Err(StatusError::Transient(
                        "304 Not Modified without a cached listing".to_string(),
                    ))
                }
            };
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let wrapper: WorkflowRunsResponse = response.json().await?;
        tracing::debug!(
            query = %key,
            total_count = wrapper.total_count,
            returned = wrapper.workflow_runs.len(),
            "updates detected"
        );

        self.store_page(
            key,
            etag.map(|etag| CachedPage {
                etag,
                runs: wrapper.workflow_runs.clone(),
            }),
        );

        Ok(wrapper.workflow_runs)
    }

    /// Rerun the failed jobs of a run through its rerun URL.
    pub async fn post_rerun_failed_jobs(&self, rerun_url: &str) -> Result<()> {
        let url = self.api_url(rerun_url)?;
        self.send(self.http().post(&url)).await?;
        Ok(())
    }

    /// Start a device flow: obtain a device code and the user verification URL.
    pub async fn request_device_code(
        &self,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceCodeResponse> {
        let url = format!("{}/login/device/code", self.options().web_base);
        let request = self
            .http()
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&[("client_id", client_id), ("scope", scope)]);

        let response = self.send_unmetered(request).await?;
        let code: DeviceCodeResponse = response.json().await?;
        Ok(code)
    }

    /// Ask once whether the user has authorized the device code.
    pub async fn poll_access_token(
        &self,
        client_id: &str,
        device_code: &str,
    ) -> Result<AccessTokenResponse> {
        let url = format!("{}/login/oauth/access_token", self.options().web_base);
        let request = self
            .http()
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", client_id),
                ("device_code", device_code),
                ("grant_type", DEVICE_GRANT_TYPE),
            ]);

        let response = self.send_unmetered(request).await?;
        let token: AccessTokenResponse = response.json().await?;
        Ok(token)
    }

    /// Check that a token is accepted by the API.
    pub async fn check_token(&self, token: &str) -> Result<bool> {
        let url = self.api_url("/user")?;
        let response = self
            .http()
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;
        tracing::info!(status = %response.status(), "tested token");
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerun_failed_jobs_url() {
        assert_eq!(
            rerun_failed_jobs_url("https://api.github.com", "acme", "widgets", 42),
            "https://api.github.com/repos/acme/widgets/actions/runs/42/rerun-failed-jobs"
        );
    }
}
