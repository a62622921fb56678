use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use fleet_drift_core::{
    ActivityEntry, ActivitySeverity, ActivitySink, Availability, CancellationToken, CatalogEntry,
    CatalogQuery, CoverageStatus, HostConfig, Orchestrator, OrchestratorConfig, ProgressSink,
    RootValidator, RunRequest, RunState, RunStatus, ScanCapability, ScanError, ScanPlan,
    ScanProgress, ScanResponse, ScanResult, ScanScope, SessionSnapshot, SessionStore,
    SortColumn, SortDirection,
};

type Script =
    dyn Fn(&[ScanPlan], &ProgressSink, &CancellationToken) -> Result<ScanResponse, ScanError>
        + Send
        + Sync;

struct FakeScanService {
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<String>>>,
    script: Box<Script>,
}

impl FakeScanService {
    fn new(
        script: impl Fn(&[ScanPlan], &ProgressSink, &CancellationToken) -> Result<ScanResponse, ScanError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    fn planned_hosts(&self) -> Vec<Vec<String>> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl ScanCapability for FakeScanService {
    fn run_scans(
        &self,
        plans: &[ScanPlan],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanResponse, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("seen lock")
            .push(plans.iter().map(|plan| plan.host_id.clone()).collect());
        (self.script)(plans, progress, cancel)
    }
}

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl ActivitySink for RecordingSink {
    fn record(&self, entry: &ActivityEntry) {
        self.entries.lock().expect("sink lock").push(entry.clone());
    }
}

#[derive(Default)]
struct MemoryStore {
    saved: RefCell<Option<SessionSnapshot>>,
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        Ok(self.saved.borrow().clone())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        *self.saved.borrow_mut() = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.saved.borrow_mut().take();
        Ok(())
    }
}

fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 2, 9, 15, 0).unwrap()
}

fn result(host_id: &str, status: RunState) -> ScanResult {
    ScanResult {
        host_id: host_id.to_string(),
        label: host_id.to_string(),
        status,
        message: String::new(),
        timestamp: fixed_time(),
        roots: Vec::new(),
        used_cache: false,
        availability: Availability::Unknown,
    }
}

fn all_succeed() -> Arc<FakeScanService> {
    FakeScanService::new(|plans, sink, _| {
        for plan in plans {
            sink.emit(ScanProgress::new(&plan.host_id, RunState::Running, ""));
        }
        Ok(ScanResponse {
            results: plans
                .iter()
                .map(|plan| result(&plan.host_id, RunState::Succeeded))
                .collect(),
            ..ScanResponse::default()
        })
    })
}

fn session(capability: Arc<FakeScanService>, hosts: &[&str]) -> Orchestrator {
    let orchestrator = Orchestrator::new(capability, OrchestratorConfig::default())
        .with_validator(Arc::new(RootValidator::new()));
    for host in hosts {
        orchestrator.add_host(host, host).expect("host added");
    }
    orchestrator
}

fn catalog_entry(config_id: &str, present: &[&str], missing: &[&str]) -> CatalogEntry {
    CatalogEntry {
        config_id: config_id.to_string(),
        display_name: config_id.to_string(),
        format: "ini".to_string(),
        drift_count: 1,
        severity: "medium".to_string(),
        present_hosts: present.iter().map(|host| host.to_string()).collect(),
        missing_hosts: missing.iter().map(|host| host.to_string()).collect(),
        coverage_status: CoverageStatus::Partial,
        last_updated: Some(fixed_time()),
        has_secrets: false,
        is_masked: false,
        has_validation_issues: false,
    }
}

#[test]
fn invalid_custom_root_excludes_only_that_host() -> Result<()> {
    let capability = all_succeed();
    let orchestrator = session(Arc::clone(&capability), &["host-01", "host-02", "host-03"]);
    orchestrator.set_scope("host-02", ScanScope::CustomRoots)?;
    orchestrator.update_root("host-02", 0, "/definitely/not/a/real/root-7f3a")?;

    let outcome = orchestrator.execute_run(false, &[]);

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.planned, 2);
    assert_eq!(outcome.cached_count, 0);
    assert_eq!(
        capability.planned_hosts(),
        vec![vec!["host-01".to_string(), "host-03".to_string()]]
    );
    let failed = orchestrator.host("host-02")?.expect("host-02");
    assert_eq!(failed.run_state, RunState::Failed);
    assert_eq!(failed.status_text, "Invalid roots");
    Ok(())
}

#[test]
fn custom_roots_plan_when_every_root_is_valid() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let etc = dir.path().join("etc");
    std::fs::create_dir(&etc)?;

    let capability = all_succeed();
    let orchestrator = session(Arc::clone(&capability), &["host-01"]);
    orchestrator.set_scope("host-01", ScanScope::CustomRoots)?;
    let first = orchestrator.update_root("host-01", 0, &etc.to_string_lossy())?;
    assert_eq!(first.message, "Ready");
    let duplicate = orchestrator.add_root("host-01", &etc.to_string_lossy().to_uppercase())?;
    assert_eq!(duplicate.message, "Duplicate root for this host");

    assert_eq!(orchestrator.execute_run(false, &[]).status, RunStatus::NothingToRun);

    orchestrator.remove_root("host-01", 1)?;
    let outcome = orchestrator.execute_run(false, &[]);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(capability.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn scoped_run_targets_only_matching_host() -> Result<()> {
    let capability = all_succeed();
    let orchestrator = session(Arc::clone(&capability), &["host-01", "host-02", "host-03"]);

    let outcome = orchestrator.execute_run(false, &["host-03".to_string()]);

    assert_eq!(outcome.planned, 1);
    assert_eq!(capability.planned_hosts(), vec![vec!["host-03".to_string()]]);
    assert_eq!(
        orchestrator.host("host-01")?.expect("host-01").run_state,
        RunState::Idle
    );
    Ok(())
}

#[test]
fn retry_only_skips_hosts_that_already_succeeded() -> Result<()> {
    let capability = all_succeed();
    let orchestrator = session(Arc::clone(&capability), &["A", "B"]);
    orchestrator.execute_run(false, &["A".to_string()]);
    let first_run_at = orchestrator.host("A")?.expect("A").last_run_at;
    assert_eq!(first_run_at, Some(fixed_time()));

    let outcome = orchestrator.execute_run(true, &[]);

    assert_eq!(outcome.cached_count, 1);
    assert_eq!(capability.planned_hosts()[1], vec!["B".to_string()]);
    let a = orchestrator.host("A")?.expect("A");
    assert_eq!(a.run_state, RunState::Cached);
    assert_eq!(a.status_text, "Using cached result");
    assert_eq!(a.last_run_at, first_run_at);
    Ok(())
}

#[test]
fn offline_host_is_flagged_for_attention() -> Result<()> {
    let capability = FakeScanService::new(|plans, _, _| {
        let results = plans
            .iter()
            .map(|plan| {
                if plan.host_id == "C" {
                    let mut failed = result("C", RunState::Failed);
                    failed.message = "Host did not respond".to_string();
                    failed.availability = Availability::Offline;
                    failed
                } else {
                    result(&plan.host_id, RunState::Succeeded)
                }
            })
            .collect();
        Ok(ScanResponse {
            results,
            ..ScanResponse::default()
        })
    });
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = session(capability, &[]).with_activity_sink(sink.clone());
    for host in ["A", "B", "C"] {
        orchestrator.add_host(host, &format!("Host {host}"))?;
    }

    let outcome = orchestrator.execute_run(false, &[]);

    let c = orchestrator.host("C")?.expect("C");
    assert_eq!(c.run_state, RunState::Failed);
    assert!(c.status_text.contains("Offline"));
    assert_eq!(outcome.attention_hosts, vec!["Host C".to_string()]);
    let entries = sink.entries.lock().expect("sink lock");
    assert!(entries.iter().any(|entry| entry.severity == ActivitySeverity::Warning
        && entry.summary == "1 host(s) need attention"
        && entry.detail.contains("Host C")));
    Ok(())
}

#[test]
fn cached_results_from_scan_service_mark_hosts_cached() -> Result<()> {
    let capability = FakeScanService::new(|plans, _, _| {
        Ok(ScanResponse {
            results: plans
                .iter()
                .map(|plan| {
                    let mut cached = result(&plan.host_id, RunState::Succeeded);
                    cached.used_cache = true;
                    cached
                })
                .collect(),
            ..ScanResponse::default()
        })
    });
    let orchestrator = session(capability, &["A"]);

    let outcome = orchestrator.execute_run(false, &[]);

    assert!(outcome.message.contains("1 cached"));
    assert_eq!(orchestrator.host("A")?.expect("A").run_state, RunState::Cached);
    Ok(())
}

#[test]
fn cancellation_keeps_partial_progress_and_releases_gate() -> Result<()> {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let attempts = AtomicUsize::new(0);
    let capability = FakeScanService::new(move |plans, sink, cancel| {
        if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(ScanResponse::default());
        }
        if let Some(first) = plans.first() {
            sink.emit(ScanProgress::new(&first.host_id, RunState::Running, "Diffing"));
        }
        let _ = entered_tx.lock().expect("entered lock").send(());
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            cancel.check()?;
            thread::sleep(Duration::from_millis(5));
        }
        Err(ScanError::failed("cancellation never arrived"))
    });
    let orchestrator = Arc::new(session(Arc::clone(&capability), &["h1", "h2"]));
    assert!(!orchestrator.cancel());

    let worker = {
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || orchestrator.execute_run(false, &[]))
    };
    entered_rx.recv_timeout(Duration::from_secs(10))?;
    assert!(orchestrator.cancel());
    let outcome = worker.join().expect("worker joins");

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(
        orchestrator.host("h1")?.expect("h1").run_state,
        RunState::Running
    );
    assert_eq!(
        orchestrator.host("h2")?.expect("h2").run_state,
        RunState::Queued
    );
    assert!(!orchestrator.is_running());
    assert!(!orchestrator.cancel());

    let rerun = orchestrator.execute_run(false, &[]);
    assert_eq!(rerun.status, RunStatus::Completed);
    assert_eq!(capability.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn capability_failure_preserves_applied_progress() -> Result<()> {
    let capability = FakeScanService::new(|plans, sink, _| {
        for plan in plans {
            sink.emit(ScanProgress::new(&plan.host_id, RunState::Running, ""));
        }
        sink.emit(ScanProgress::new("h1", RunState::Succeeded, "Matched baseline"));
        Err(ScanError::failed("scan service unreachable"))
    });
    let orchestrator = session(capability, &["h1", "h2"]);

    let outcome = orchestrator.execute_run(false, &[]);

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.message.contains("scan service unreachable"));
    assert_eq!(
        orchestrator.host("h1")?.expect("h1").run_state,
        RunState::Succeeded
    );
    assert_eq!(
        orchestrator.host("h2")?.expect("h2").run_state,
        RunState::Running
    );
    let last = orchestrator.last_outcome()?.expect("outcome recorded");
    assert_eq!(last.status, RunStatus::Failed);
    Ok(())
}

#[test]
fn catalog_drives_targeted_rescan_of_missing_hosts() -> Result<()> {
    let capability = FakeScanService::new(|plans, _, _| {
        Ok(ScanResponse {
            results: plans
                .iter()
                .map(|plan| result(&plan.host_id, RunState::Succeeded))
                .collect(),
            catalog: vec![
                catalog_entry("app.ini", &["h1", "h2"], &["h3"]),
                catalog_entry("db.ini", &["h1"], &["h2", "h3"]),
                catalog_entry("base.ini", &["h1", "h2", "h3"], &[]),
            ],
            drilldown: None,
        })
    });
    let orchestrator = session(Arc::clone(&capability), &["h1", "h2", "h3"]);
    orchestrator.execute_run(false, &[]);

    let view = orchestrator.query_catalog(&CatalogQuery {
        sort: SortColumn::Coverage,
        direction: SortDirection::Ascending,
        ..CatalogQuery::default()
    })?;
    let ids = view
        .iter()
        .map(|item| item.entry.config_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["db.ini", "app.ini", "base.ini"]);
    assert_eq!(view[1].coverage_text, "2/3");
    assert!(view[1].is_partial_coverage);

    let single = orchestrator.run(&RunRequest {
        missing_for: Some("app.ini".to_string()),
        ..RunRequest::default()
    });
    assert_eq!(single.planned, 1);
    assert_eq!(capability.planned_hosts()[1], vec!["h3".to_string()]);

    let union = orchestrator.execute_missing_run(None);
    assert_eq!(union.planned, 2);
    assert_eq!(
        capability.planned_hosts()[2],
        vec!["h2".to_string(), "h3".to_string()]
    );
    Ok(())
}

#[test]
fn catalog_total_hosts_tracks_enabled_hosts() -> Result<()> {
    let capability = FakeScanService::new(|_, _, _| {
        Ok(ScanResponse {
            catalog: vec![catalog_entry("app.ini", &["h1"], &[])],
            ..ScanResponse::default()
        })
    });
    let orchestrator = session(capability, &["h1", "h2"]);
    orchestrator.set_enabled("h2", false)?;

    orchestrator.execute_run(false, &[]);
    let view = orchestrator.catalog_view()?;
    assert_eq!(view[0].total_hosts, 1);
    assert!(view[0].is_full_coverage);
    Ok(())
}

#[test]
fn session_round_trips_through_store() -> Result<()> {
    let store = MemoryStore::default();
    let orchestrator = session(all_succeed(), &["web-01", "db-01"]);
    orchestrator.set_enabled("db-01", false)?;
    orchestrator.set_catalog_query(CatalogQuery {
        sort: SortColumn::Severity,
        ..CatalogQuery::default()
    })?;
    orchestrator.persist(&store)?;

    let restored = session(all_succeed(), &[]);
    assert!(restored.load_from(&store)?);
    let hosts = restored.hosts()?;
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[1].run_state, RunState::Skipped);
    assert_eq!(restored.catalog_query()?.sort, SortColumn::Severity);

    store.clear()?;
    assert!(!restored.load_from(&store)?);
    Ok(())
}

#[test]
fn restore_rejects_duplicate_ids() {
    let orchestrator = session(all_succeed(), &[]);
    let host = HostConfig {
        host_id: "web-01".to_string(),
        label: "Web".to_string(),
        enabled: true,
        scope: ScanScope::AllDrives,
        roots: Vec::new(),
        include_in_export: true,
    };
    let snapshot = SessionSnapshot {
        hosts: vec![host.clone(), host],
        catalog_query: CatalogQuery::default(),
    };
    assert!(orchestrator.restore(snapshot).is_err());
}

#[test]
fn activity_log_is_bounded() {
    let config = OrchestratorConfig {
        activity_log_capacity: 5,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(all_succeed(), config);
    for index in 0..4 {
        orchestrator
            .add_host(&format!("h{index}"), "")
            .expect("host added");
    }
    orchestrator.execute_run(false, &[]);

    let activity = orchestrator.activity().expect("activity");
    assert_eq!(activity.len(), 5);
    assert!(activity
        .last()
        .is_some_and(|entry| entry.summary.starts_with("Scan completed")));
}
