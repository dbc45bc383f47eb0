// Action resolver.
// Turns a click on a run into a URL to open or a rerun request.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StatusError};
use crate::github::ActionsApi;
use crate::model::WorkflowRun;

/// Which variant of click the user made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Plain,
    Secondary,
    Rerun,
    Actor,
    Commit,
    /// Anything the surface sends that is not understood; resolves to nothing.
    Unknown(String),
}

impl FromStr for Modifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" | "plain" | "left" => Modifier::Plain,
            "secondary" | "right" | "repo" => Modifier::Secondary,
            "rerun" | "control" | "ctrl" => Modifier::Rerun,
            "actor" | "option" | "alt" => Modifier::Actor,
            "commit" | "command" | "cmd" => Modifier::Commit,
            _ => Modifier::Unknown(s.trim().to_string()),
        })
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Plain => write!(f, "plain"),
            Modifier::Secondary => write!(f, "secondary"),
            Modifier::Rerun => write!(f, "rerun"),
            Modifier::Actor => write!(f, "actor"),
            Modifier::Commit => write!(f, "commit"),
            Modifier::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// Raw click state from a surface that reports keys and buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickEvent {
    pub secondary: bool,
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl ClickEvent {
    /// Keyboard modifiers win over the button; control first, then option, then command.
    pub fn modifier(&self) -> Modifier {
        if self.control {
            Modifier::Rerun
        } else if self.option {
            Modifier::Actor
        } else if self.command {
            Modifier::Commit
        } else if self.secondary {
            Modifier::Secondary
        } else {
            Modifier::Plain
        }
    }
}

/// Where a click leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    OpenUrl(String),
    RerunFailedJobs { rerun_url: String },
    Nothing,
}

/// Map a run and a modifier to a navigation target. Makes no calls.
pub fn resolve(run: &WorkflowRun, modifier: &Modifier) -> Navigation {
    match modifier {
        Modifier::Plain => Navigation::OpenUrl(run.html_url.clone()),
        Modifier::Secondary => Navigation::OpenUrl(run.repo_url.clone()),
        Modifier::Actor => Navigation::OpenUrl(run.actor.html_url.clone()),
        Modifier::Commit => Navigation::OpenUrl(run.commit_url()),
        Modifier::Rerun => match &run.rerun_url {
            Some(rerun_url) => Navigation::RerunFailedJobs {
                rerun_url: rerun_url.clone(),
            },
            None => Navigation::Nothing,
        },
        Modifier::Unknown(_) => Navigation::Nothing,
    }
}

/// What a performed click amounted to, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Open(String),
    RerunRequested,
    NoOp,
}

/// Resolve a click and carry out the rerun if that is what it resolves to.
///
/// Opening URLs is left to the surface.
pub async fn perform(api: &dyn ActionsApi, run: &WorkflowRun, modifier: &Modifier) -> Result<ActionOutcome> {
    match resolve(run, modifier) {
        Navigation::OpenUrl(url) => {
            tracing::info!(run_id = run.id, url = %url, %modifier, "opening");
            Ok(ActionOutcome::Open(url))
        }
        Navigation::RerunFailedJobs { rerun_url } => {
            tracing::info!(run_id = run.id, url = %rerun_url, "rerunning failed jobs");
            api.rerun_failed_jobs(&rerun_url)
                .await
                .map_err(|e| StatusError::ActionFailed(format!("rerun of run {}: {}", run.id, e)))?;
            Ok(ActionOutcome::RerunRequested)
        }
        Navigation::Nothing => {
            tracing::info!(run_id = run.id, %modifier, "nothing to do");
            Ok(ActionOutcome::NoOp)
        }
    }
}
