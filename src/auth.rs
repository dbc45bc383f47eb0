// Authentication for the GitHub API.
// Shared bearer-token cell plus the OAuth device-flow state machine that fills it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::{Result, StatusError};
use crate::github::GitHubClient;
use crate::github::types::{AccessTokenResponse, DeviceCodeResponse};
use crate::store;

/// OAuth scope requested by the device flow; private repos need `repo`.
pub const SCOPE: &str = "repo";

/// Extra wait GitHub asks for with each `slow_down` answer.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// The bearer token every API call reads, shared between client and session.
///
/// `None` means anonymous mode: calls still work, with a lower rate limit
/// and no access to private repositories.
#[derive(Debug, Clone)]
pub struct Credentials {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn new(token: Option<String>) -> Self {
        let (tx, _) = watch::channel(token.filter(|t| !t.trim().is_empty()));
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn set(&self, token: Option<String>) {
        self.tx.send_replace(token);
    }

    /// Drop the token after the API rejected it, unless it was already replaced.
    pub fn revoke_if_current(&self, token: &str) -> bool {
        let revoked = self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token) {
                *current = None;
                true
            } else {
                false
            }
        });
        if revoked {
            tracing::warn!("token rejected by GitHub, continuing unauthenticated");
        }
        revoked
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

/// Pick the starting token: explicit (env or config) first, then the token file.
pub fn initial_token(explicit: Option<String>, token_path: Option<&Path>) -> Result<Option<String>> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        tracing::info!("using token from environment or config");
        return Ok(Some(token.trim().to_string()));
    }

    let Some(path) = token_path else {
        return Ok(None);
    };
    match store::read_text(path)? {
        Some(token) if !token.trim().is_empty() => {
            tracing::info!(path = %path.display(), "loaded OAuth token from file");
            Ok(Some(token.trim().to_string()))
        }
        _ => {
            tracing::info!(path = %path.display(), "OAuth token file not found");
            Ok(None)
        }
    }
}

/// A device code the user must enter at the verification URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCode {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_at: DateTime<Utc>,
    device_code: String,
    interval: Duration,
}

impl DeviceCode {
    fn from_response(response: DeviceCodeResponse, now: DateTime<Utc>) -> Self {
        Self {
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            expires_at: now + chrono::Duration::seconds(response.expires_in as i64),
            device_code: response.device_code,
            interval: Duration::from_secs(response.interval),
        }
    }
}

/// Where the device flow currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    DeviceCodeRequested,
    PollingForToken(DeviceCode),
    Authorized,
    /// The user declined; restart the flow to try again.
    Denied,
    /// The device code or the stored token expired.
    Expired,
    Failed(String),
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "Authenticate",
            AuthState::DeviceCodeRequested | AuthState::PollingForToken(_) => "Authenticating",
            AuthState::Authorized => "Authenticated",
            AuthState::Denied => "Denied",
            AuthState::Expired => "Expired",
            AuthState::Failed(_) => "Cannot authenticate",
        }
    }
}

/// OAuth device-flow endpoints.
#[async_trait]
pub trait DeviceFlow: Send + Sync {
    async fn request_device_code(&self, client_id: &str, scope: &str) -> Result<DeviceCodeResponse>;
    async fn poll_access_token(&self, client_id: &str, device_code: &str) -> Result<AccessTokenResponse>;
    async fn check_token(&self, token: &str) -> Result<bool>;
}

#[async_trait]
impl DeviceFlow for GitHubClient {
    async fn request_device_code(&self, client_id: &str, scope: &str) -> Result<DeviceCodeResponse> {
        GitHubClient::request_device_code(self, client_id, scope).await
    }

    async fn poll_access_token(&self, client_id: &str, device_code: &str) -> Result<AccessTokenResponse> {
        GitHubClient::poll_access_token(self, client_id, device_code).await
    }

    async fn check_token(&self, token: &str) -> Result<bool> {
        GitHubClient::check_token(self, token).await
    }
}

/// Device-flow state machine producing a token in [`Credentials`].
pub struct AuthSession {
    flow: Arc<dyn DeviceFlow>,
    credentials: Credentials,
    client_id: Option<String>,
    token_path: Option<PathBuf>,
    state: watch::Sender<AuthState>,
}

impl AuthSession {
    pub fn new(
        flow: Arc<dyn DeviceFlow>,
        credentials: Credentials,
        client_id: Option<String>,
        token_path: Option<PathBuf>,
    ) -> Self {
        let initial = if credentials.is_authenticated() {
            AuthState::Authorized
        } else {
            AuthState::Unauthenticated
        };
        let (state, _) = watch::channel(initial);
        if client_id.is_none() {
            tracing::warn!("GITHUB_OAUTH_CLIENT_ID not set, device flow unavailable");
        }
        Self {
            flow,
            credentials,
            client_id,
            token_path,
            state,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether a device flow can be started at all.
    pub fn can_authenticate(&self) -> bool {
        self.client_id.is_some()
    }

    fn set_state(&self, state: AuthState) {
        tracing::debug!(state = state.label(), "auth state");
        self.state.send_replace(state);
    }

    fn client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .ok_or_else(|| StatusError::Auth("no OAuth client id configured".to_string()))
    }

    /// Obtain a device code and user verification URL.
    pub async fn request_code(&self) -> Result<DeviceCode> {
        let client_id = self.client_id()?;
        self.set_state(AuthState::DeviceCodeRequested);

        match self.flow.request_device_code(client_id, SCOPE).await {
            Ok(response) => {
                let code = DeviceCode::from_response(response, Utc::now());
                tracing::info!(
                    user_code = %code.user_code,
                    verification_uri = %code.verification_uri,
                    "device code issued"
                );
                self.set_state(AuthState::PollingForToken(code.clone()));
                Ok(code)
            }
            Err(e) => {
                self.set_state(AuthState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Poll at the server-dictated interval until the user authorizes, declines or the code expires.
    ///
    /// Denial and expiry are reported, never retried.
    pub async fn wait_for_token(&self, code: &DeviceCode) -> Result<()> {
        let client_id = self.client_id()?;
        let mut interval = code.interval;

        loop {
            tokio::time::sleep(interval).await;

            if Utc::now() >= code.expires_at {
                return self.fail(StatusError::AuthExpired);
            }

            tracing::debug!("polling for user action");
            let response = match self.flow.poll_access_token(client_id, &code.device_code).await {
                Ok(response) => response,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "token poll failed, retrying");
                    continue;
                }
                Err(e) => return self.fail(e),
            };

            if let Some(token) = response.access_token {
                return self.accept(token).await;
            }

            match response.error.as_deref() {
                Some("authorization_pending") | None => {}
                Some("slow_down") => {
                    interval = response
                        .interval
                        .map(Duration::from_secs)
                        .unwrap_or(interval + SLOW_DOWN_STEP);
                    tracing::debug!(interval_secs = interval.as_secs(), "slowing down token polls");
                }
                Some("expired_token") => return self.fail(StatusError::AuthExpired),
                Some("access_denied") => return self.fail(StatusError::AuthDenied),
                Some(other) => {
                    let detail = response.error_description.unwrap_or_default();
                    return self.fail(StatusError::Auth(format!("{} {}", other, detail).trim().to_string()));
                }
            }
        }
    }

    /// Run the whole flow, handing the code to `on_code` for display.
    pub async fn login(&self, on_code: impl FnOnce(&DeviceCode)) -> Result<()> {
        let code = self.request_code().await?;
        on_code(&code);
        self.wait_for_token(&code).await
    }

    async fn accept(&self, token: String) -> Result<()> {
        match self.flow.check_token(&token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("authentication produced an invalid token");
                return self.fail(StatusError::Auth("token rejected by GitHub".to_string()));
            }
            Err(e) => return self.fail(e),
        }

        self.credentials.set(Some(token.clone()));
        if let Some(path) = &self.token_path {
            match store::write_text(path, &token) {
                Ok(()) => tracing::info!(path = %path.display(), "wrote token to file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not store token"),
            }
        }
        self.set_state(AuthState::Authorized);
        Ok(())
    }

    fn fail(&self, error: StatusError) -> Result<()> {
        let state = match &error {
            StatusError::AuthDenied => AuthState::Denied,
            StatusError::AuthExpired => AuthState::Expired,
            other => AuthState::Failed(other.to_string()),
        };
        tracing::warn!(error = %error, "authentication failed");
        self.set_state(state);
        Err(error)
    }

    /// Follow the credentials cell; when the client revokes a rejected token,
    /// mark the session expired and forget that token if it is the stored one.
    ///
    /// Subscribes on call, so a revocation after this returns is never missed.
    pub fn watch_revocations(self: Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
        let rx = self.credentials.subscribe();
        self.follow_revocations(rx)
    }

    async fn follow_revocations(self: Arc<Self>, mut rx: watch::Receiver<Option<String>>) {
        let mut held = rx.borrow_and_update().clone();
        while rx.changed().await.is_ok() {
            let current = rx.borrow_and_update().clone();
            if current.is_none()
                && let Some(revoked) = held.take()
                && self.state() == AuthState::Authorized
            {
                self.set_state(AuthState::Expired);
                self.forget_stored(&revoked);
            }
            held = current;
        }
    }

    fn forget_stored(&self, revoked: &str) {
        let Some(path) = &self.token_path else {
            return;
        };
        match store::read_text(path) {
            Ok(Some(stored)) if stored.trim() == revoked => match store::delete(path) {
                Ok(()) => tracing::info!(path = %path.display(), "removed rejected token file"),
                Err(e) => tracing::warn!(error = %e, "could not remove stored token"),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not read stored token"),
        }
    }
}
