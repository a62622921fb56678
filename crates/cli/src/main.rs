use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleet_drift_core::{
    build_plans, render_run_summary, CatalogQuery, CoverageFilter, Orchestrator,
    OrchestratorConfig, PlanOptions, RunOutcome, RunRequest, RunStatus, ScanResponse, ScanScope,
    SortColumn, SortDirection, ValidationState,
};
use fleet_drift_service::{
    build_orchestrator, load_config, JsonFileSessionStore, ReplayCapability,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "fleet-drift",
    version,
    about = "Plan and run configuration-drift scans across a fleet of hosts."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate every host's custom scan roots.
    Validate(ValidateArgs),
    /// Show which hosts a run would scan, without scanning.
    Plan(PlanArgs),
    /// Run a scan against a recorded scan response.
    Run(RunArgs),
    /// Run a scan and print the config catalog.
    Catalog(CatalogArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Session file with host configuration (JSON).
    #[arg(long, value_name = "FILE")]
    hosts: PathBuf,

    /// Orchestrator config file (JSON). Defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Skip hosts whose last result succeeded.
    #[arg(long)]
    retry_only: bool,

    /// Restrict to these host ids or labels (repeatable).
    #[arg(long = "host", value_name = "HOST", num_args = 1.., action = ArgAction::Append)]
    only_hosts: Vec<String>,

    /// Optional JSON output file for the plans.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ScanSourceArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Recorded scan response to replay (JSON).
    #[arg(long, value_name = "FILE")]
    response: PathBuf,

    /// Simulated per-host scan time.
    #[arg(long, default_value_t = 0, value_name = "MS")]
    host_delay_ms: u64,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    source: ScanSourceArgs,

    /// Skip hosts whose last result succeeded.
    #[arg(long)]
    retry_only: bool,

    /// Restrict to these host ids or labels (repeatable).
    #[arg(long = "host", value_name = "HOST", num_args = 1.., action = ArgAction::Append)]
    only_hosts: Vec<String>,

    /// After a full run, re-scan only the hosts missing this config.
    #[arg(long, value_name = "CONFIG_ID", conflicts_with = "missing_all")]
    missing_for: Option<String>,

    /// After a full run, re-scan hosts missing any partially covered config.
    #[arg(long)]
    missing_all: bool,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,

    /// Write the host configuration back to this session file.
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Optional JSON output file for the run outcome.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliCoverage {
    All,
    Full,
    Partial,
    Missing,
}

impl From<CliCoverage> for CoverageFilter {
    fn from(value: CliCoverage) -> Self {
        match value {
            CliCoverage::All => CoverageFilter::All,
            CliCoverage::Full => CoverageFilter::Full,
            CliCoverage::Partial => CoverageFilter::Partial,
            CliCoverage::Missing => CoverageFilter::Missing,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliSortColumn {
    #[value(name = "drift", alias = "drift-count")]
    DriftCount,
    Coverage,
    Format,
    Severity,
    #[value(name = "updated", alias = "last-updated")]
    LastUpdated,
}

impl From<CliSortColumn> for SortColumn {
    fn from(value: CliSortColumn) -> Self {
        match value {
            CliSortColumn::DriftCount => SortColumn::DriftCount,
            CliSortColumn::Coverage => SortColumn::Coverage,
            CliSortColumn::Format => SortColumn::Format,
            CliSortColumn::Severity => SortColumn::Severity,
            CliSortColumn::LastUpdated => SortColumn::LastUpdated,
        }
    }
}

#[derive(Debug, Args)]
struct CatalogArgs {
    #[command(flatten)]
    source: ScanSourceArgs,

    /// Coverage filter.
    #[arg(long, default_value = "all")]
    coverage: CliCoverage,

    /// Only entries with this severity.
    #[arg(long)]
    severity: Option<String>,

    /// Only entries with this format.
    #[arg(long)]
    format: Option<String>,

    /// Case-insensitive match on config id or display name.
    #[arg(long, default_value = "")]
    search: String,

    /// Sort column.
    #[arg(long, default_value = "drift")]
    sort: CliSortColumn,

    /// Sort ascending instead of descending.
    #[arg(long)]
    asc: bool,

    /// Print per-host drilldown for this config.
    #[arg(long, value_name = "CONFIG_ID")]
    drilldown: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate(args) => run_validate_command(args),
        Commands::Plan(args) => run_plan_command(args),
        Commands::Run(args) => run_run_command(args),
        Commands::Catalog(args) => run_catalog_command(args),
    }
}

fn run_validate_command(args: ValidateArgs) -> Result<()> {
    let orchestrator = offline_orchestrator(&args.session)?;
    let hosts = orchestrator.hosts()?;
    let mut invalid = 0_usize;

    for host in &hosts {
        println!(
            "{} ({}) scope={} enabled={}",
            host.label,
            host.host_id,
            scope_label(host.scope),
            host.enabled
        );
        for (index, root) in host.roots.iter().enumerate() {
            if root.validation_state == ValidationState::Invalid {
                invalid += 1;
            }
            println!(
                "  [{index}] {} -> {:?}: {}",
                if root.path.is_empty() { "<blank>" } else { root.path.as_str() },
                root.validation_state,
                root.status_message
            );
        }
    }

    println!("Checked {} host(s), {} invalid root(s).", hosts.len(), invalid);
    if invalid > 0 {
        bail!("{invalid} invalid root(s)");
    }
    Ok(())
}

fn run_plan_command(args: PlanArgs) -> Result<()> {
    let orchestrator = offline_orchestrator(&args.session)?;
    let mut hosts = orchestrator.hosts()?;
    let options = PlanOptions {
        retry_only: args.retry_only,
        include_drilldown: orchestrator.config().include_drilldown,
    };
    let batch = build_plans(&mut hosts, options, &args.only_hosts);

    if batch.plans.is_empty() {
        println!("No hosts would be scanned ({} cached).", batch.cached_count);
    } else {
        println!(
            "{} host(s) would be scanned, {} cached:",
            batch.plans.len(),
            batch.cached_count
        );
        for plan in &batch.plans {
            println!(
                "- #{} {} ({}) scope={}{}{}",
                plan.baseline_priority,
                plan.label,
                plan.host_id,
                scope_label(plan.scope),
                if plan.roots.is_empty() {
                    String::new()
                } else {
                    format!(" roots={}", plan.roots.join(","))
                },
                if plan.prefer_baseline { " [baseline]" } else { "" }
            );
        }
    }
    for host in hosts.iter().filter(|host| {
        host.enabled && batch.plans.iter().all(|plan| plan.host_id != host.host_id)
    }) {
        println!("  skipped {}: {}", host.label, host.status_text);
    }

    if let Some(output) = args.output {
        write_json(&output, &batch, "plans")?;
    }
    Ok(())
}

fn run_run_command(args: RunArgs) -> Result<()> {
    let orchestrator = scanning_orchestrator(&args.source)?;

    let request = RunRequest {
        retry_only: args.retry_only,
        hosts: args.only_hosts,
        ..RunRequest::default()
    };
    let mut outcome = orchestrator.run(&request);
    print_outcome(&orchestrator, &outcome)?;

    let targeted = targeted_request(args.missing_for, args.missing_all);
    if let Some(request) = targeted.filter(|_| outcome.status == RunStatus::Completed) {
        info!(
            missing_for = ?request.missing_for,
            missing_all = request.missing_all,
            "starting targeted re-scan"
        );
        outcome = orchestrator.run(&request);
        println!();
        println!("Targeted re-scan:");
        print_outcome(&orchestrator, &outcome)?;
    }

    if let Some(md_path) = args.md {
        let markdown = render_run_summary(
            Some(&outcome),
            &orchestrator.hosts()?,
            &orchestrator.catalog_view()?,
        );
        fs::write(&md_path, markdown).with_context(|| {
            format!("failed to write markdown summary to {}", md_path.display())
        })?;
        println!("Markdown summary written to {}", md_path.display());
    }

    if let Some(save) = args.save {
        orchestrator.persist(&JsonFileSessionStore::new(&save))?;
        println!("Session written to {}", save.display());
    }

    if let Some(output) = args.output {
        write_json(&output, &outcome, "run outcome")?;
    }

    if outcome.status == RunStatus::Failed {
        bail!("{}", outcome.message);
    }
    Ok(())
}

/// Follow-up request for `--missing-for`/`--missing-all`, if either was given.
fn targeted_request(missing_for: Option<String>, missing_all: bool) -> Option<RunRequest> {
    if missing_for.is_none() && !missing_all {
        return None;
    }
    Some(RunRequest {
        missing_for,
        missing_all,
        ..RunRequest::default()
    })
}

fn run_catalog_command(args: CatalogArgs) -> Result<()> {
    let orchestrator = scanning_orchestrator(&args.source)?;
    let outcome = orchestrator.run(&RunRequest::default());
    if outcome.status != RunStatus::Completed {
        bail!("scan did not complete: {}", outcome.message);
    }

    let query = CatalogQuery {
        coverage: args.coverage.into(),
        severity: args.severity,
        format: args.format,
        search: args.search,
        sort: args.sort.into(),
        direction: if args.asc {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        },
    };
    let items = orchestrator.query_catalog(&query)?;

    if items.is_empty() {
        println!("No catalog entries match.");
    } else {
        println!("{} config(s):", items.len());
        for item in &items {
            let entry = &item.entry;
            println!(
                "- {} [{}] drift={} severity={} coverage={}{}{}",
                entry.display_name,
                entry.format,
                entry.drift_count,
                if entry.severity.is_empty() { "-" } else { entry.severity.as_str() },
                item.coverage_text,
                if entry.missing_hosts.is_empty() {
                    String::new()
                } else {
                    format!(" missing={}", entry.missing_hosts.join(","))
                },
                if entry.has_secrets { " secrets" } else { "" }
            );
        }
    }

    if let Some(config_id) = args.drilldown {
        let entries = orchestrator.drilldown_for(&config_id)?;
        println!("Drilldown for {config_id}: {} host(s)", entries.len());
        for entry in entries {
            println!(
                "- {} drift={} {}",
                entry.host_id, entry.drift_count, entry.summary
            );
            for line in entry.lines {
                println!("    {line}");
            }
        }
    }
    Ok(())
}

fn print_outcome(orchestrator: &Orchestrator, outcome: &RunOutcome) -> Result<()> {
    println!(
        "Run {}: {:?} | planned {} | cached {}",
        outcome.run_id, outcome.status, outcome.planned, outcome.cached_count
    );
    println!("{}", outcome.message);
    for host in orchestrator.hosts()? {
        println!(
            "- {} ({}) {} | {}",
            host.label,
            host.host_id,
            host.run_state.label(),
            host.status_text
        );
    }
    if !outcome.attention_hosts.is_empty() {
        println!("Needs attention: {}", outcome.attention_hosts.join(", "));
    }
    Ok(())
}

fn orchestrator_config(args: &SessionArgs) -> Result<OrchestratorConfig> {
    match &args.config {
        Some(path) => load_config(path),
        None => Ok(OrchestratorConfig::default()),
    }
}

fn offline_orchestrator(args: &SessionArgs) -> Result<Orchestrator> {
    let capability = ReplayCapability::new(ScanResponse::default());
    let orchestrator = Orchestrator::new(Arc::new(capability), orchestrator_config(args)?);
    if !orchestrator.load_from(&JsonFileSessionStore::new(&args.hosts))? {
        bail!("hosts file not found: {}", args.hosts.display());
    }
    Ok(orchestrator)
}

fn scanning_orchestrator(args: &ScanSourceArgs) -> Result<Orchestrator> {
    build_orchestrator(
        &args.response,
        Some(&args.session.hosts),
        orchestrator_config(&args.session)?,
        Duration::from_millis(args.host_delay_ms),
    )
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(value).with_context(|| format!("failed to serialize {what}"))?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write {what} to {}", path.display()))?;
    println!("JSON {what} written to {}", path.display());
    Ok(())
}

fn scope_label(scope: ScanScope) -> &'static str {
    match scope {
        ScanScope::AllDrives => "all_drives",
        ScanScope::SingleDrive => "single_drive",
        ScanScope::CustomRoots => "custom_roots",
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{offline_orchestrator, targeted_request, Cli, Commands, SessionArgs};

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "fleet-drift",
            "run",
            "--hosts",
            "hosts.json",
            "--response",
            "response.json",
            "--host",
            "web-01",
            "--host",
            "db-01",
            "--missing-for",
            "sshd_config",
        ])
        .expect("parses");
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.only_hosts, vec!["web-01".to_string(), "db-01".to_string()]);
        assert_eq!(args.missing_for.as_deref(), Some("sshd_config"));

        assert!(Cli::try_parse_from([
            "fleet-drift",
            "run",
            "--hosts",
            "h.json",
            "--response",
            "r.json",
            "--missing-for",
            "x",
            "--missing-all",
        ])
        .is_err());
    }

    #[test]
    fn offline_orchestrator_restores_hosts_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hosts = dir.path().join("hosts.json");
        std::fs::write(
            &hosts,
            r#"{ "hosts": [ { "host_id": "web-01", "label": "Web" },
                            { "host_id": "db-01", "label": "DB", "scope": "custom_roots",
                              "roots": ["relative/path"] } ] }"#,
        )
        .expect("write hosts");

        let orchestrator = offline_orchestrator(&SessionArgs {
            hosts,
            config: None,
        })
        .expect("restores");
        let slots = orchestrator.hosts().expect("hosts");
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].roots[0].status_message, "Path must be absolute");

        let missing = SessionArgs {
            hosts: dir.path().join("absent.json"),
            config: None,
        };
        assert!(offline_orchestrator(&missing).is_err());
    }

    #[test]
    fn targeted_request_only_when_missing_flags_given() {
        assert!(targeted_request(None, false).is_none());

        let request = targeted_request(Some("sshd_config".to_string()), false).expect("request");
        assert_eq!(request.missing_for.as_deref(), Some("sshd_config"));
        assert!(!request.missing_all);
        assert!(!request.retry_only);
        assert!(request.hosts.is_empty());

        let request = targeted_request(None, true).expect("request");
        assert!(request.missing_all);
        assert!(request.missing_for.is_none());
    }
}
