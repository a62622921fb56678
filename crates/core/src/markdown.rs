use crate::catalog::CatalogItemView;
use crate::model::{CoverageStatus, HostSlot, RunOutcome, RunStatus};

pub fn render_run_summary(
    outcome: Option<&RunOutcome>,
    hosts: &[HostSlot],
    items: &[CatalogItemView],
) -> String {
    let mut out = String::new();
    out.push_str("# Fleet Drift Summary\n\n");

    match outcome {
        Some(outcome) => {
            out.push_str(&format!(
                "- Run: `{}`\n- Status: `{}`\n- Started: `{}`\n- Finished: `{}`\n- Planned hosts: {}\n- Cached hosts: {}\n- Result: {}\n\n",
                outcome.run_id,
                run_status_label(outcome.status),
                outcome.started_at.to_rfc3339(),
                outcome.finished_at.to_rfc3339(),
                outcome.planned,
                outcome.cached_count,
                outcome.message
            ));
            if !outcome.attention_hosts.is_empty() {
                out.push_str(&format!(
                    "**Needs attention:** {}\n\n",
                    outcome.attention_hosts.join(", ")
                ));
            }
        }
        None => out.push_str("No scan has run in this session.\n\n"),
    }

    out.push_str("## Hosts\n\n");
    if hosts.is_empty() {
        out.push_str("No hosts configured.\n\n");
    } else {
        out.push_str("| Host | Enabled | State | Status | Last run |\n");
        out.push_str("|---|---|---|---|---|\n");
        for host in hosts {
            out.push_str(&format!(
                "| {} (`{}`) | {} | `{}` | {} | {} |\n",
                host.label,
                host.host_id,
                if host.enabled { "yes" } else { "no" },
                host.run_state.label(),
                escape_cell(&host.status_text),
                host.last_run_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
        out.push('\n');
    }

    out.push_str("## Config Coverage\n\n");
    if items.is_empty() {
        out.push_str("No catalog entries.\n");
    } else {
        out.push_str("| Config | Format | Drift | Severity | Coverage | Missing on |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for item in items {
            let entry = &item.entry;
            out.push_str(&format!(
                "| {} (`{}`) | {} | {} | {} | {} ({}) | {} |\n",
                escape_cell(&entry.display_name),
                entry.config_id,
                entry.format,
                entry.drift_count,
                if entry.severity.is_empty() { "-" } else { entry.severity.as_str() },
                item.coverage_text,
                coverage_label(item.coverage),
                if entry.missing_hosts.is_empty() {
                    "-".to_string()
                } else {
                    entry.missing_hosts.join(", ")
                }
            ));
        }
    }

    out
}

fn run_status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "completed",
        RunStatus::NothingToRun => "nothing_to_run",
        RunStatus::AlreadyInProgress => "already_in_progress",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Failed => "failed",
    }
}

fn coverage_label(coverage: CoverageStatus) -> &'static str {
    match coverage {
        CoverageStatus::Full => "full",
        CoverageStatus::Partial => "partial",
        CoverageStatus::Missing => "missing",
    }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}
