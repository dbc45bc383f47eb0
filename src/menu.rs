// Menu text for each target.
// One line per target, prefixed with its indicator symbol.

use chrono::{DateTime, Utc};

use crate::indicator::Indicator;
use crate::snapshot::{Snapshot, TargetEntry};
use crate::target::MonitorTarget;

/// Format a timestamp as relative time (e.g., "2h ago").
pub fn format_relative_time(dt: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(*dt);

    if duration.num_days() > 0 {
        format!("{}d ago", duration.num_days())
    } else if duration.num_hours() > 0 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_minutes() > 0 {
        format!("{}m ago", duration.num_minutes())
    } else {
        "just now".to_string()
    }
}

/// Title of one target's menu item.
///
/// Unpolled targets show the no-runs symbol. The workflow label prefers the
/// run's display name over the configured file name.
pub fn menu_title(target: &MonitorTarget, entry: Option<&TargetEntry>, now: DateTime<Utc>) -> String {
    let indicator = entry.map(Indicator::of).unwrap_or(Indicator::NoRuns);
    let run = entry.and_then(TargetEntry::run);

    let mut title = format!("{} {}/{}", indicator.symbol(), target.owner, target.repo);
    if let Some(workflow) = &target.workflow {
        let name = run.map(|r| r.workflow.name.as_str()).unwrap_or(workflow);
        title.push_str(&format!(" 🧹{}", name));
    }
    if let Some(branch) = &target.branch {
        title.push_str(&format!(" 🌳{}", branch));
    }
    if let Some(event) = &target.event {
        title.push_str(&format!(" 🎉{}", event));
    }
    if let Some(actor) = &target.actor {
        title.push_str(&format!(" 🎭{}", actor));
    }
    title.push_str(" - ");
    match run {
        Some(run) => title.push_str(&format_relative_time(&run.updated_at, now)),
        None => title.push_str("never"),
    }
    if let Some(error) = entry.and_then(TargetEntry::error) {
        title.push_str(&format!(" ({})", error));
    }
    title
}

/// Every target's title, in configuration order.
pub fn menu_lines(snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<String> {
    snapshot
        .iter()
        .map(|(target, entry)| menu_title(target, entry, now))
        .collect()
}
