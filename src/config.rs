// Monitor configuration.
// JSON file listing the repositories to watch plus global polling settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatusError};
use crate::github::ClientOptions;
use crate::github::rate_limit::DEFAULT_LOW_WATER;
use crate::store;
use crate::target::MonitorTarget;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// One configured repository entry; optional fields narrow which runs count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEntry {
    #[serde(alias = "org")]
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl MonitorEntry {
    pub fn target(&self) -> MonitorTarget {
        MonitorTarget {
            owner: self.owner.trim().to_string(),
            repo: self.repo.trim().to_string(),
            workflow: non_empty(&self.workflow),
            branch: non_empty(&self.branch),
            actor: non_empty(&self.actor),
            event: non_empty(&self.event),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Top-level configuration, loaded from `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub repos: Vec<MonitorEntry>,
    /// Seconds between polls of each target.
    #[serde(alias = "pollIntervalSeconds", alias = "poll_interval_secs")]
    pub interval: u64,
    /// 0 errors only, 1 warnings, 2 info, 3 debug, 4 trace.
    pub verbosity: u8,
    /// Write JSON logs here instead of stderr.
    pub logfile: Option<PathBuf>,
    /// Bearer token; `GITHUB_TOKEN` takes precedence.
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    /// Requests kept in reserve before polling pauses until the rate limit resets.
    pub rate_limit_low_water: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            interval: DEFAULT_INTERVAL_SECS,
            verbosity: 2,
            logfile: None,
            token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            rate_limit_low_water: DEFAULT_LOW_WATER,
        }
    }
}

impl MonitorConfig {
    /// Body written when no config file exists yet.
    pub fn starter() -> Self {
        Self {
            repos: vec![
                MonitorEntry {
                    owner: "rust-lang".to_string(),
                    repo: "rustup".to_string(),
                    workflow: None,
                    branch: Some("master".to_string()),
                    actor: None,
                    event: Some("push".to_string()),
                },
                MonitorEntry {
                    owner: "tokio-rs".to_string(),
                    repo: "tokio".to_string(),
                    workflow: Some("ci.yml".to_string()),
                    branch: None,
                    actor: None,
                    event: None,
                },
            ],
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = store::read_text(path)?.ok_or_else(|| {
            StatusError::Config(format!("config file {} does not exist", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Read a config file, first writing the starter config if it is missing.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let body = serde_json::to_string_pretty(&Self::starter())?;
            store::write_text(path, &body)?;
            tracing::info!(path = %path.display(), "wrote default config");
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(StatusError::Config("interval must be at least 1 second".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(StatusError::Config(
                "request_timeout_secs must be at least 1 second".into(),
            ));
        }
        for (index, entry) in self.repos.iter().enumerate() {
            if entry.owner.trim().is_empty() || entry.repo.trim().is_empty() {
                return Err(StatusError::Config(format!(
                    "repos[{}] needs both owner and repo",
                    index
                )));
            }
            if entry.owner.contains('/') || entry.repo.contains('/') {
                return Err(StatusError::Config(format!(
                    "repos[{}]: owner and repo must not contain '/'",
                    index
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: self.request_timeout(),
            low_water: self.rate_limit_low_water,
            ..ClientOptions::default()
        }
    }
}
