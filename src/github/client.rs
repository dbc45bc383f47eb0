// GitHub API HTTP client.
// Handles authentication, rate limiting, timeouts and response classification.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};

use crate::auth::Credentials;
use crate::error::{PermanentCause, Result, StatusError};

use super::rate_limit::{DEFAULT_LOW_WATER, RateLimit, RateLimitGate};
use super::types::ApiWorkflowRun;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_WEB_BASE: &str = "https://github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Upper bound on any single request, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs fetched per listing; only the newest few matter.
pub const DEFAULT_PER_PAGE: u32 = 10;

/// Wait after a rate-limit refusal that names no usable reset time.
const REFUSAL_BACKOFF_SECS: i64 = 60;

/// Connection settings for a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base: String,
    pub web_base: String,
    pub timeout: Duration,
    pub low_water: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: GITHUB_API_BASE.to_string(),
            web_base: GITHUB_WEB_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            low_water: DEFAULT_LOW_WATER,
        }
    }
}

/// Last listing seen for a URL, replayed on `304 Not Modified`.
#[derive(Debug, Clone)]
pub(crate) struct CachedPage {
    pub etag: String,
    pub runs: Vec<ApiWorkflowRun>,
}

/// GitHub API client with authentication and rate limit tracking.
///
/// Shared by reference between all pollers; the rate-limit budget and the
/// ETag cache are the only mutable state and both sit behind short-lived locks.
pub struct GitHubClient {
    client: Client,
    options: ClientOptions,
    credentials: Credentials,
    rate_limit: RateLimitGate,
    pages: Mutex<HashMap<String, CachedPage>>,
}

impl GitHubClient {
    /// Create a new GitHub client reading its bearer token from `credentials`.
    pub fn new(credentials: Credentials, options: ClientOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("actions-status/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .build()?;

        Ok(Self {
            client,
            rate_limit: RateLimitGate::new(options.low_water),
            options,
            credentials,
            pages: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Get the current rate limit information.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit.current()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Resolve an endpoint path or absolute URL against the API base.
    ///
    /// Absolute URLs must point at the API host, so the bearer token is never
    /// sent anywhere else.
    pub(crate) fn api_url(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with('/') {
            return Ok(format!("{}{}", self.options.api_base, endpoint));
        }
        if endpoint.starts_with(&format!("{}/", self.options.api_base)) {
            return Ok(endpoint.to_string());
        }
        Err(PermanentCause::InvalidRequest(format!("refusing non-API URL {}", endpoint)).into())
    }

    /// Send an API request through the rate-limit gate, with the bearer token if one is set.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.rate_limit.acquire(Utc::now())?;

        let token = self.credentials.token();
        let request = match &token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        };

        let response = request.send().await?;
        self.observe_rate_limit(&response);
        self.check_response(response, token.as_deref()).await
    }

    /// Send a request outside the API budget (OAuth endpoints live on the web host).
    pub(crate) async fn send_unmetered(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        self.check_response(response, None).await
    }

    pub(crate) fn cached_page(&self, key: &str) -> Option<CachedPage> {
        self.pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub(crate) fn store_page(&self, key: String, page: Option<CachedPage>) {
        let mut pages = self
            .pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match page {
            Some(page) => pages.insert(key, page),
            None => pages.remove(&key),
        };
    }

    /// Update rate limit from response headers.
    fn observe_rate_limit(&self, response: &Response) {
        let Some(observed) = RateLimit::from_headers(response.headers()) else {
            return;
        };

        if observed.remaining <= observed.limit / 4 {
            tracing::warn!(
                limit = observed.limit,
                remaining = observed.remaining,
                reset = %observed.reset_at(),
                "rate limit running low"
            );
        } else {
            tracing::debug!(
                limit = observed.limit,
                remaining = observed.remaining,
                reset = %observed.reset_at(),
                "rate limit"
            );
        }

        self.rate_limit.update(observed);
    }

    /// When a refused response is a rate-limit refusal, the time it lifts.
    fn refusal_reset(&self, response: &Response) -> Option<chrono::DateTime<Utc>> {
        let headers = response.headers();
        if let Some(secs) = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            return Some(Utc::now() + chrono::Duration::seconds(secs));
        }

        RateLimit::from_headers(headers)
            .filter(|rl| rl.remaining == 0)
            .map(|rl| {
                let now = Utc::now();
                if rl.reset_at() > now {
                    rl.reset_at()
                } else {
                    // Reset already behind our clock; back off instead of retrying at once.
                    now + chrono::Duration::seconds(REFUSAL_BACKOFF_SECS)
                }
            })
    }

    /// Check response status and convert errors.
    async fn check_response(&self, response: Response, token: Option<&str>) -> Result<Response> {
        let status = response.status();
        match status {
            s if s.is_success() || s == StatusCode::NOT_MODIFIED => Ok(response),
            StatusCode::UNAUTHORIZED => match token {
                // The token is at fault, not the target: drop it and retry anonymously.
                Some(token) => {
                    self.credentials.revoke_if_current(token);
                    Err(StatusError::Transient(
                        "token rejected, retrying unauthenticated".to_string(),
                    ))
                }
                None => Err(PermanentCause::Unauthorized.into()),
            },
            StatusCode::NOT_FOUND => {
                let url = response.url().path().to_string();
                Err(PermanentCause::NotFound(url).into())
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                if let Some(reset_at) = self.refusal_reset(&response) {
                    self.rate_limit.exhaust(reset_at);
                    Err(StatusError::RateLimited { reset_at })
                } else if status == StatusCode::TOO_MANY_REQUESTS {
                    let reset_at = Utc::now() + chrono::Duration::seconds(REFUSAL_BACKOFF_SECS);
                    self.rate_limit.exhaust(reset_at);
                    Err(StatusError::RateLimited { reset_at })
                } else {
                    Err(PermanentCause::Forbidden(response.text().await.unwrap_or_default()).into())
                }
            }
            s if s.is_server_error() => Err(StatusError::Transient(format!(
                "HTTP {}: {}",
                s,
                response.text().await.unwrap_or_default()
            ))),
            s => Err(PermanentCause::Rejected(s.as_u16()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str) -> GitHubClient {
        let options = ClientOptions {
            api_base: api_base.to_string(),
            ..ClientOptions::default()
        };
        GitHubClient::new(Credentials::anonymous(), options).unwrap()
    }

    #[test]
    fn test_api_url_resolution() {
        let client = client("https://api.example");
        assert_eq!(
            client.api_url("/repos/a/b").unwrap(),
            "https://api.example/repos/a/b"
        );
        assert_eq!(
            client
                .api_url("https://api.example/runs/42/rerun-failed-jobs")
                .unwrap(),
            "https://api.example/runs/42/rerun-failed-jobs"
        );
    }

    #[test]
    fn test_api_url_refuses_foreign_hosts() {
        let client = client("https://api.example");
        let err = client
            .api_url("https://api.example.evil/runs/1/rerun-failed-jobs")
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_page_cache_roundtrip() {
        let client = client("https://api.example");
        assert!(client.cached_page("k").is_none());
        client.store_page(
            "k".to_string(),
            Some(CachedPage {
                etag: "\"abc\"".to_string(),
                runs: Vec::new(),
            }),
        );
        assert_eq!(client.cached_page("k").unwrap().etag, "\"abc\"");
        client.store_page("k".to_string(), None);
        assert!(client.cached_page("k").is_none());
    }
}
