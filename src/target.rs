// Monitor targets derived from configuration.
// Each target is one filter combination; the set is diffed on reload.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::model::WorkflowRun;

/// One configured filter combination to poll.
///
/// The filter values themselves are the target's identity: two config
/// entries with identical filters are the same target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub owner: String,
    pub repo: String,
    pub workflow: Option<String>,
    pub branch: Option<String>,
    pub actor: Option<String>,
    pub event: Option<String>,
}

impl MonitorTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            workflow: None,
            branch: None,
            actor: None,
            event: None,
        }
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Whether a run belongs to this target's repo and satisfies every set filter.
    pub fn matches(&self, run: &WorkflowRun) -> bool {
        run.repo.same_as(&self.owner, &self.repo)
            && self.workflow.as_deref().is_none_or(|w| run.workflow.matches(w))
            && self.branch.as_deref().is_none_or(|b| run.branch == b)
            && self.actor.as_deref().is_none_or(|a| run.actor.login.eq_ignore_ascii_case(a))
            && self.event.as_deref().is_none_or(|e| run.event == e)
    }

    /// The listing query that fetches candidate runs for this target.
    pub fn query(&self, per_page: u32) -> RunQuery {
        RunQuery {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            workflow: self.workflow.clone(),
            branch: self.branch.clone(),
            actor: self.actor.clone(),
            event: self.event.clone(),
            per_page,
        }
    }
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)?;
        if let Some(workflow) = &self.workflow {
            write!(f, " workflow={}", workflow)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, " branch={}", branch)?;
        }
        if let Some(actor) = &self.actor {
            write!(f, " actor={}", actor)?;
        }
        if let Some(event) = &self.event {
            write!(f, " event={}", event)?;
        }
        Ok(())
    }
}

/// Parameters of a workflow-runs listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub owner: String,
    pub repo: String,
    /// Workflow file name or id; scopes the listing to that workflow.
    pub workflow: Option<String>,
    pub branch: Option<String>,
    pub actor: Option<String>,
    pub event: Option<String>,
    pub per_page: u32,
}

impl RunQuery {
    /// Endpoint path for this query.
    ///
    /// A workflow given as a path (`.github/workflows/ci.yml`) is addressed by
    /// its file name, which is all the API accepts.
    pub fn path(&self) -> String {
        match &self.workflow {
            Some(workflow) => format!(
                "/repos/{}/{}/actions/workflows/{}/runs",
                self.owner,
                self.repo,
                workflow.rsplit('/').next().unwrap_or(workflow)
            ),
            None => format!("/repos/{}/{}/actions/runs", self.owner, self.repo),
        }
    }

    /// Query-string parameters, in a stable order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("per_page", self.per_page.to_string())];
        if let Some(actor) = &self.actor {
            params.push(("actor", actor.clone()));
        }
        if let Some(branch) = &self.branch {
            params.push(("branch", branch.clone()));
        }
        if let Some(event) = &self.event {
            params.push(("event", event.clone()));
        }
        params
    }

    /// Key identifying this exact request, used for conditional requests.
    pub fn cache_key(&self) -> String {
        let params: Vec<String> = self
            .params()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.path(), params.join("&"))
    }
}

/// The ordered, de-duplicated set of targets for one configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    targets: Vec<MonitorTarget>,
}

/// What changed between two target sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDiff {
    pub added: Vec<MonitorTarget>,
    pub removed: Vec<MonitorTarget>,
    pub unchanged: Vec<MonitorTarget>,
}

impl TargetSet {
    pub fn new(targets: impl IntoIterator<Item = MonitorTarget>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for target in targets {
            if seen.insert(target.clone()) {
                unique.push(target);
            } else {
                tracing::warn!(monitor = %target, "duplicate monitor entry ignored");
            }
        }
        Self { targets: unique }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.repos.iter().map(|entry| entry.target()))
    }

    pub fn targets(&self) -> &[MonitorTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, target: &MonitorTarget) -> bool {
        self.targets.contains(target)
    }

    /// Compare against the set currently running (`self`) to get the delta for `next`.
    pub fn diff(&self, next: &TargetSet) -> TargetDiff {
        let current: HashSet<&MonitorTarget> = self.targets.iter().collect();
        let upcoming: HashSet<&MonitorTarget> = next.targets.iter().collect();

        TargetDiff {
            added: next
                .targets
                .iter()
                .filter(|t| !current.contains(t))
                .cloned()
                .collect(),
            removed: self
                .targets
                .iter()
                .filter(|t| !upcoming.contains(t))
                .cloned()
                .collect(),
            unchanged: next
                .targets
                .iter()
                .filter(|t| current.contains(t))
                .cloned()
                .collect(),
        }
    }
}
