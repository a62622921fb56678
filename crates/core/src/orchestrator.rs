use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityEntry, ActivityLog, ActivitySeverity, ActivitySink};
use crate::capability::{CancellationToken, ProgressSink, ScanCapability, ScanError};
use crate::catalog::{Catalog, CatalogItemView, CatalogQuery};
use crate::config::OrchestratorConfig;
use crate::model::{
    Availability, DrilldownEntry, HostSlot, RootEntry, RunOutcome, RunState, RunStatus, ScanPlan,
    ScanProgress, ScanResponse, ScanResult, ScanScope,
};
use crate::planner::{build_plans, PlanBatch, PlanOptions};
use crate::session::{HostConfig, SessionError, SessionEvent, SessionSnapshot, SessionStore};
use crate::validate::{RootValidation, RootValidator};

pub const MSG_ALREADY_RUNNING: &str = "A scan is already in progress";
pub const MSG_ALL_CACHED: &str = "All selected hosts already have cached results";
pub const MSG_NOTHING_READY: &str = "No hosts are ready to scan";
pub const MSG_NOTHING_MISSING: &str = "No hosts are missing configs";
pub const MSG_NO_RESULT: &str = "No result reported";
pub const MSG_CANCELLED: &str = "Scan cancelled";
pub const MSG_DISABLED: &str = "Disabled";

/// What the caller wants scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunRequest {
    #[serde(default)]
    pub retry_only: bool,
    /// Host ids or labels; empty means every enabled host.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Re-scan only the hosts missing this config.
    #[serde(default)]
    pub missing_for: Option<String>,
    /// Re-scan hosts missing any partially covered config.
    #[serde(default)]
    pub missing_all: bool,
}

struct FleetState {
    slots: Vec<HostSlot>,
    used_ids: HashSet<String>,
    catalog: Catalog,
    catalog_query: CatalogQuery,
    activity: ActivityLog,
    last_outcome: Option<RunOutcome>,
    /// Lowercased ids of the hosts planned for the run in flight.
    active_hosts: HashSet<String>,
}

impl FleetState {
    fn index_of(&self, host_id: &str) -> Option<usize> {
        let host_id = host_id.trim();
        self.slots
            .iter()
            .position(|slot| slot.host_id.eq_ignore_ascii_case(host_id))
    }

    fn require(&self, host_id: &str) -> Result<usize, SessionError> {
        self.index_of(host_id)
            .ok_or_else(|| SessionError::UnknownHost(host_id.to_string()))
    }

    fn active_host_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.enabled).count()
    }

    fn in_current_run(&self, host_id: &str) -> bool {
        self.active_hosts.contains(&host_id.trim().to_lowercase())
    }
}

/// Non-blocking single-flight gate, released when the guard drops.
struct RunGate<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGate<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGate<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Holds the gate and the run's cancellation token; the token slot is
/// cleared before the gate is released.
struct ActiveRun<'a> {
    token: CancellationToken,
    slot: &'a Mutex<Option<CancellationToken>>,
    _gate: RunGate<'a>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }
}

struct RunContext {
    run_id: String,
    started_at: DateTime<Utc>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    fn outcome(&self, status: RunStatus, message: impl Into<String>) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id.clone(),
            status,
            message: message.into(),
            planned: 0,
            cached_count: 0,
            attention_hosts: Vec::new(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct RunTally {
    succeeded: usize,
    failed: usize,
    cached: usize,
    attention: Vec<String>,
}

/// Owns the host slots and catalog of one session and runs scans against
/// an external [`ScanCapability`].
///
/// Every mutation of session state goes through the internal state lock;
/// progress events raised by the capability on its own threads are queued
/// and applied by the thread that called [`Orchestrator::execute_run`].
/// Activity sinks are invoked with that lock held and must not call back
/// into the orchestrator, except for [`Orchestrator::cancel`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    capability: Arc<dyn ScanCapability>,
    validator: Arc<RootValidator>,
    sinks: Vec<Arc<dyn ActivitySink>>,
    state: Mutex<FleetState>,
    in_flight: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(capability: Arc<dyn ScanCapability>, config: OrchestratorConfig) -> Self {
        let activity = ActivityLog::with_capacity(config.activity_log_capacity);
        Self {
            config,
            capability,
            validator: RootValidator::shared(),
            sinks: Vec::new(),
            state: Mutex::new(FleetState {
                slots: Vec::new(),
                used_ids: HashSet::new(),
                catalog: Catalog::default(),
                catalog_query: CatalogQuery::default(),
                activity,
                last_outcome: None,
                active_hosts: HashSet::new(),
            }),
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<RootValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Receives every change event published after this call.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // ---- host configuration -------------------------------------------

    pub fn add_host(&self, host_id: &str, label: &str) -> Result<(), SessionError> {
        let host_id = host_id.trim();
        if host_id.is_empty() {
            return Err(SessionError::BlankHostId);
        }
        let mut state = self.lock_state()?;
        if !state.used_ids.insert(host_id.to_lowercase()) {
            return Err(SessionError::DuplicateHost(host_id.to_string()));
        }

        let label = match label.trim() {
            "" => host_id,
            label => label,
        };
        let mut slot = HostSlot::new(host_id, label);
        slot.set_state(RunState::Idle, RunState::Idle.default_status_text());
        state.slots.push(slot);
        let index = state.slots.len() - 1;
        self.host_changed(&mut state, index);
        Ok(())
    }

    /// Removes a host; its id stays reserved for the rest of the session.
    pub fn remove_host(&self, host_id: &str) -> Result<(), SessionError> {
        let mut state = self.lock_state()?;
        let index = state.require(host_id)?;
        let slot = state.slots.remove(index);
        self.record(
            &mut state,
            ActivitySeverity::Info,
            format!("{} removed", slot.label),
            slot.host_id,
        );
        Ok(())
    }

    pub fn set_enabled(&self, host_id: &str, enabled: bool) -> Result<(), SessionError> {
        self.update_slot(host_id, |this, slot| {
            slot.enabled = enabled;
            if enabled {
                ensure_custom_root(slot);
                this.revalidate(slot);
                slot.set_state(RunState::Idle, RunState::Idle.default_status_text());
            } else {
                slot.set_state(RunState::Skipped, MSG_DISABLED);
            }
            Ok(())
        })
    }

    pub fn set_scope(&self, host_id: &str, scope: ScanScope) -> Result<(), SessionError> {
        self.update_slot(host_id, |this, slot| {
            slot.scope = scope;
            if slot.enabled {
                ensure_custom_root(slot);
            }
            this.revalidate(slot);
            Ok(())
        })
    }

    pub fn add_root(&self, host_id: &str, path: &str) -> Result<RootValidation, SessionError> {
        self.update_slot(host_id, |this, slot| {
            slot.roots.push(RootEntry::new(path.trim()));
            this.revalidate(slot);
            Ok(slot.roots.last().map(root_validation).unwrap_or_else(|| {
                RootValidation {
                    state: Default::default(),
                    message: String::new(),
                }
            }))
        })
    }

    pub fn update_root(
        &self,
        host_id: &str,
        index: usize,
        path: &str,
    ) -> Result<RootValidation, SessionError> {
        self.update_slot(host_id, |this, slot| {
            let host_id = slot.host_id.clone();
            let root = slot
                .roots
                .get_mut(index)
                .ok_or(SessionError::UnknownRoot { host_id, index })?;
            root.path = path.trim().to_string();
            this.revalidate(slot);
            Ok(root_validation(&slot.roots[index]))
        })
    }

    pub fn remove_root(&self, host_id: &str, index: usize) -> Result<(), SessionError> {
        self.update_slot(host_id, |this, slot| {
            if index >= slot.roots.len() {
                return Err(SessionError::UnknownRoot {
                    host_id: slot.host_id.clone(),
                    index,
                });
            }
            if slot.enabled && slot.scope == ScanScope::CustomRoots && slot.roots.len() <= 1 {
                return Err(SessionError::LastRoot(slot.host_id.clone()));
            }
            slot.roots.remove(index);
            this.revalidate(slot);
            Ok(())
        })
    }

    pub fn revalidate_roots(&self, host_id: &str) -> Result<(), SessionError> {
        self.update_slot(host_id, |this, slot| {
            this.revalidate(slot);
            Ok(())
        })
    }

    pub fn revalidate_all(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state()?;
        for index in 0..state.slots.len() {
            self.revalidate(&mut state.slots[index]);
            self.host_changed(&mut state, index);
        }
        Ok(())
    }

    // ---- accessors ----------------------------------------------------

    pub fn hosts(&self) -> Result<Vec<HostSlot>, SessionError> {
        Ok(self.lock_state()?.slots.clone())
    }

    pub fn host(&self, host_id: &str) -> Result<Option<HostSlot>, SessionError> {
        let state = self.lock_state()?;
        Ok(state.index_of(host_id).map(|index| state.slots[index].clone()))
    }

    pub fn activity(&self) -> Result<Vec<ActivityEntry>, SessionError> {
        Ok(self.lock_state()?.activity.entries().cloned().collect())
    }

    pub fn last_outcome(&self) -> Result<Option<RunOutcome>, SessionError> {
        Ok(self.lock_state()?.last_outcome.clone())
    }

    pub fn catalog_query(&self) -> Result<CatalogQuery, SessionError> {
        Ok(self.lock_state()?.catalog_query.clone())
    }

    pub fn set_catalog_query(&self, query: CatalogQuery) -> Result<(), SessionError> {
        self.lock_state()?.catalog_query = query;
        Ok(())
    }

    /// Catalog filtered and sorted by the session's saved query.
    pub fn catalog_view(&self) -> Result<Vec<CatalogItemView>, SessionError> {
        let state = self.lock_state()?;
        Ok(state.catalog.query(&state.catalog_query))
    }

    pub fn query_catalog(&self, query: &CatalogQuery) -> Result<Vec<CatalogItemView>, SessionError> {
        Ok(self.lock_state()?.catalog.query(query))
    }

    pub fn missing_hosts_for(&self, config_id: &str) -> Result<Vec<String>, SessionError> {
        Ok(self.lock_state()?.catalog.missing_hosts_for(config_id))
    }

    pub fn missing_hosts_union(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.lock_state()?.catalog.missing_hosts_union())
    }

    pub fn drilldown_for(&self, config_id: &str) -> Result<Vec<DrilldownEntry>, SessionError> {
        Ok(self
            .lock_state()?
            .catalog
            .drilldown_for(config_id)
            .into_iter()
            .cloned()
            .collect())
    }

    // ---- persistence --------------------------------------------------

    pub fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let state = self.lock_state()?;
        Ok(SessionSnapshot {
            hosts: state.slots.iter().map(HostConfig::from).collect(),
            catalog_query: state.catalog_query.clone(),
        })
    }

    /// Replaces every host and clears the catalog.
    pub fn restore(&self, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::RunInProgress);
        }

        let mut used_ids = HashSet::new();
        let mut slots = Vec::with_capacity(snapshot.hosts.len());
        for host in snapshot.hosts {
            let host_id = host.host_id.trim().to_string();
            if host_id.is_empty() {
                return Err(SessionError::BlankHostId);
            }
            if !used_ids.insert(host_id.to_lowercase()) {
                return Err(SessionError::DuplicateHost(host_id));
            }
            let mut slot = host.into_slot();
            if slot.enabled {
                ensure_custom_root(&mut slot);
                slot.set_state(RunState::Idle, RunState::Idle.default_status_text());
            }
            self.revalidate(&mut slot);
            slots.push(slot);
        }

        let mut state = self.lock_state()?;
        state.slots = slots;
        state.used_ids = used_ids;
        state.catalog = Catalog::default();
        state.catalog_query = snapshot.catalog_query;
        state.last_outcome = None;
        state.active_hosts.clear();
        for index in 0..state.slots.len() {
            self.host_changed(&mut state, index);
        }
        let detail = format!("{} host(s)", state.slots.len());
        self.record(&mut state, ActivitySeverity::Info, "Session restored", detail);
        Ok(())
    }

    pub fn persist(&self, store: &dyn SessionStore) -> anyhow::Result<()> {
        let snapshot = self.snapshot()?;
        store.save(&snapshot)
    }

    /// Restores from the store; returns `false` when nothing was saved.
    pub fn load_from(&self, store: &dyn SessionStore) -> anyhow::Result<bool> {
        match store.load()? {
            Some(snapshot) => {
                self.restore(snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---- runs ---------------------------------------------------------

    pub fn run(&self, request: &RunRequest) -> RunOutcome {
        if let Some(config_id) = request.missing_for.as_deref() {
            return self.execute_missing_run(Some(config_id));
        }
        if request.missing_all {
            return self.execute_missing_run(None);
        }
        self.execute_run(request.retry_only, &request.hosts)
    }

    /// Plans and executes one scan run.
    ///
    /// Returns immediately with [`RunStatus::AlreadyInProgress`] and without
    /// touching any host when another run holds the gate.
    pub fn execute_run(&self, retry_only: bool, scoped_host_ids: &[String]) -> RunOutcome {
        let ctx = RunContext::new();
        let Some(run) = self.begin_run() else {
            warn!("scan run rejected: another run is in progress");
            return ctx.outcome(RunStatus::AlreadyInProgress, MSG_ALREADY_RUNNING);
        };
        self.run_gated(&run, ctx, retry_only, scoped_host_ids)
    }

    /// Re-scans only the hosts missing one config, or missing any config when
    /// `config_id` is `None`.
    pub fn execute_missing_run(&self, config_id: Option<&str>) -> RunOutcome {
        let ctx = RunContext::new();
        let Some(run) = self.begin_run() else {
            warn!("missing-host run rejected: another run is in progress");
            return ctx.outcome(RunStatus::AlreadyInProgress, MSG_ALREADY_RUNNING);
        };
        let hosts = match config_id {
            Some(config_id) => self.missing_hosts_for(config_id),
            None => self.missing_hosts_union(),
        };
        match hosts {
            Ok(hosts) if hosts.is_empty() => {
                self.finish(ctx.outcome(RunStatus::NothingToRun, MSG_NOTHING_MISSING))
            }
            Ok(hosts) => self.run_gated(&run, ctx, false, &hosts),
            Err(err) => self.finish(ctx.outcome(RunStatus::Failed, err.to_string())),
        }
    }

    /// Signals the in-flight run to stop; returns `false` when nothing is running.
    ///
    /// Never takes the session state lock, so it is safe to call from an
    /// activity sink or subscriber.
    pub fn cancel(&self) -> bool {
        let token = self
            .cancel
            .lock()
            .ok()
            .and_then(|current| current.clone());
        let Some(token) = token else {
            return false;
        };
        token.cancel();
        info!("scan cancellation requested");
        true
    }

    /// Takes the gate and installs a fresh cancellation token in one step, so
    /// `cancel` never observes a running orchestrator without a token.
    fn begin_run(&self) -> Option<ActiveRun<'_>> {
        let mut slot = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let gate = RunGate::try_acquire(&self.in_flight)?;
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Some(ActiveRun {
            token,
            slot: &self.cancel,
            _gate: gate,
        })
    }

    fn run_gated(
        &self,
        run: &ActiveRun<'_>,
        ctx: RunContext,
        retry_only: bool,
        scoped_host_ids: &[String],
    ) -> RunOutcome {
        let batch = match self.plan_run(retry_only, scoped_host_ids) {
            Ok(batch) => batch,
            Err(err) => return self.finish(ctx.outcome(RunStatus::Failed, err.to_string())),
        };

        if batch.plans.is_empty() {
            let message = if batch.cached_count > 0 {
                MSG_ALL_CACHED
            } else {
                MSG_NOTHING_READY
            };
            let mut outcome = ctx.outcome(RunStatus::NothingToRun, message);
            outcome.cached_count = batch.cached_count;
            return self.finish(outcome);
        }

        info!(
            run_id = %ctx.run_id,
            planned = batch.plans.len(),
            cached = batch.cached_count,
            "scan run started"
        );
        self.publish(SessionEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            planned: batch.plans.len(),
        });
        if let Ok(mut state) = self.lock_state() {
            self.record(
                &mut state,
                ActivitySeverity::Info,
                "Scan started",
                format!(
                    "{} host(s) planned, {} cached",
                    batch.plans.len(),
                    batch.cached_count
                ),
            );
        }

        let result = if run.token.is_cancelled() {
            debug!(run_id = %ctx.run_id, "cancelled before the scan service was called");
            Err(ScanError::Cancelled)
        } else {
            self.call_capability(&batch.plans, &run.token)
        };

        let mut outcome = match result {
            Ok(response) => match self.apply_results(response) {
                Ok(tally) => {
                    let mut outcome = ctx.outcome(
                        RunStatus::Completed,
                        format!(
                            "Scan completed: {} succeeded, {} failed, {} cached",
                            tally.succeeded, tally.failed, tally.cached
                        ),
                    );
                    outcome.attention_hosts = tally.attention;
                    outcome
                }
                Err(err) => ctx.outcome(RunStatus::Failed, err.to_string()),
            },
            Err(ScanError::Cancelled) => ctx.outcome(RunStatus::Cancelled, MSG_CANCELLED),
            Err(ScanError::Failed(reason)) => {
                warn!(run_id = %ctx.run_id, %reason, "scan capability failed");
                ctx.outcome(RunStatus::Failed, format!("Scan failed: {reason}"))
            }
        };
        outcome.planned = batch.plans.len();
        outcome.cached_count = batch.cached_count;
        self.finish(outcome)
    }

    fn plan_run(&self, retry_only: bool, scoped: &[String]) -> Result<PlanBatch, SessionError> {
        let mut state = self.lock_state()?;
        let before = state
            .slots
            .iter()
            .map(|slot| (slot.run_state, slot.status_text.clone()))
            .collect::<Vec<_>>();

        let options = PlanOptions {
            retry_only,
            include_drilldown: self.config.include_drilldown,
        };
        let batch = build_plans(&mut state.slots, options, scoped);

        let changed = state
            .slots
            .iter()
            .zip(&before)
            .enumerate()
            .filter(|(_, (slot, (run_state, text)))| {
                slot.run_state != *run_state || slot.status_text != *text
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        for index in changed {
            self.host_changed(&mut state, index);
        }

        state.active_hosts = batch
            .plans
            .iter()
            .map(|plan| plan.host_id.to_lowercase())
            .collect();
        Ok(batch)
    }

    fn call_capability(
        &self,
        plans: &[ScanPlan],
        token: &CancellationToken,
    ) -> Result<ScanResponse, ScanError> {
        let (tx, rx) = mpsc::channel();
        let capability = Arc::clone(&self.capability);
        let poll_interval = self.config.progress_poll_interval();

        thread::scope(|scope| {
            let worker = scope.spawn(move || {
                let sink = ProgressSink::new(tx);
                capability.run_scans(plans, &sink, token)
            });

            loop {
                match rx.recv_timeout(poll_interval) {
                    Ok(progress) => self.apply_progress(progress),
                    Err(RecvTimeoutError::Timeout) if worker.is_finished() => break,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            for progress in rx.try_iter() {
                self.apply_progress(progress);
            }

            worker
                .join()
                .unwrap_or_else(|_| Err(ScanError::failed("scan capability panicked")))
        })
    }

    fn apply_progress(&self, progress: ScanProgress) {
        let Ok(mut state) = self.lock_state() else {
            warn!(host_id = %progress.host_id, "dropping progress: session state unavailable");
            return;
        };
        if !state.in_current_run(&progress.host_id) {
            debug!(host_id = %progress.host_id, "ignoring progress for host outside the run");
            return;
        }
        let Some(index) = state.index_of(&progress.host_id) else {
            return;
        };

        let slot = &mut state.slots[index];
        if !slot.enabled {
            return;
        }
        if progress.status.rank() < slot.run_state.rank() {
            debug!(
                host_id = %progress.host_id,
                from = slot.run_state.label(),
                to = progress.status.label(),
                "ignoring out-of-order progress"
            );
            return;
        }

        let message = if progress.message.trim().is_empty() {
            progress.status.default_status_text().to_string()
        } else {
            progress.message
        };
        slot.set_state(progress.status, message);
        slot.last_run_at = Some(progress.timestamp);
        self.host_changed(&mut state, index);
    }

    fn apply_results(&self, response: ScanResponse) -> Result<RunTally, SessionError> {
        let mut state = self.lock_state()?;

        for result in response.results {
            if !state.in_current_run(&result.host_id) {
                debug!(host_id = %result.host_id, "ignoring result for host outside the run");
                continue;
            }
            let Some(index) = state.index_of(&result.host_id) else {
                continue;
            };
            if !state.slots[index].enabled {
                continue;
            }

            let status = if result.used_cache {
                RunState::Cached
            } else if result.status.is_terminal() {
                result.status
            } else {
                // Non-terminal result states count as failures.
                RunState::Failed
            };
            let message = result_message(status, &result);
            let slot = &mut state.slots[index];
            slot.set_state(status, message);
            slot.last_run_at = Some(result.timestamp);
            self.host_changed(&mut state, index);
        }

        let unreported = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.enabled && !slot.run_state.is_terminal() && state.in_current_run(&slot.host_id)
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        for index in unreported {
            state.slots[index].set_state(RunState::Failed, MSG_NO_RESULT);
            self.host_changed(&mut state, index);
        }

        let mut tally = RunTally::default();
        for slot in state
            .slots
            .iter()
            .filter(|slot| slot.enabled && state.in_current_run(&slot.host_id))
        {
            match slot.run_state {
                RunState::Succeeded => tally.succeeded += 1,
                RunState::Cached => tally.cached += 1,
                RunState::Failed => {
                    tally.failed += 1;
                    tally.attention.push(slot.label.clone());
                }
                _ => {}
            }
        }

        let total_hosts = state.active_host_count();
        state.catalog.load(
            response.catalog,
            response.drilldown.unwrap_or_default(),
            total_hosts,
        );
        self.publish(SessionEvent::CatalogReplaced {
            items: state.catalog.items().to_vec(),
        });

        if !tally.attention.is_empty() {
            let summary = format!("{} host(s) need attention", tally.attention.len());
            let detail = tally.attention.join(", ");
            self.record(&mut state, ActivitySeverity::Warning, summary, detail);
        }
        Ok(tally)
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        let severity = match outcome.status {
            RunStatus::Completed if outcome.attention_hosts.is_empty() => ActivitySeverity::Success,
            RunStatus::Completed | RunStatus::Cancelled => ActivitySeverity::Warning,
            RunStatus::Failed => ActivitySeverity::Error,
            RunStatus::NothingToRun | RunStatus::AlreadyInProgress => ActivitySeverity::Info,
        };
        info!(
            run_id = %outcome.run_id,
            status = ?outcome.status,
            message = %outcome.message,
            "scan run finished"
        );

        if let Ok(mut state) = self.lock_state() {
            state.active_hosts.clear();
            state.last_outcome = Some(outcome.clone());
            self.record(&mut state, severity, outcome.message.clone(), String::new());
        }
        self.publish(SessionEvent::RunFinished {
            outcome: outcome.clone(),
        });
        outcome
    }

    fn update_slot<R>(
        &self,
        host_id: &str,
        apply: impl FnOnce(&Self, &mut HostSlot) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let mut state = self.lock_state()?;
        let index = state.require(host_id)?;
        let value = apply(self, &mut state.slots[index])?;
        self.host_changed(&mut state, index);
        Ok(value)
    }

    fn revalidate(&self, slot: &mut HostSlot) {
        let scope = slot.scope;
        let paths = slot
            .roots
            .iter()
            .map(|root| root.path.clone())
            .collect::<Vec<_>>();
        for (index, root) in slot.roots.iter_mut().enumerate() {
            let siblings = paths
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, path)| path.as_str())
                .collect::<Vec<_>>();
            let result = self.validator.validate(scope, &root.path, &siblings);
            root.validation_state = result.state;
            root.status_message = result.message;
        }
    }

    fn host_changed(&self, state: &mut FleetState, index: usize) {
        let slot = &state.slots[index];
        let severity = match slot.run_state {
            RunState::Failed => ActivitySeverity::Warning,
            RunState::Succeeded => ActivitySeverity::Success,
            _ => ActivitySeverity::Info,
        };
        let event = SessionEvent::HostUpdated {
            host_id: slot.host_id.clone(),
            run_state: slot.run_state,
            status_text: slot.status_text.clone(),
        };
        let summary = format!("{}: {}", slot.label, slot.run_state.label());
        let detail = slot.status_text.clone();

        self.publish(event);
        self.record(state, severity, summary, detail);
    }

    fn record(
        &self,
        state: &mut FleetState,
        severity: ActivitySeverity,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            severity,
            summary: summary.into(),
            detail: detail.into(),
        };
        debug!(?severity, summary = %entry.summary, detail = %entry.detail, "activity");
        for sink in &self.sinks {
            sink.record(&entry);
        }
        state.activity.push(entry.clone());
        self.publish(SessionEvent::Activity { entry });
    }

    fn publish(&self, event: SessionEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, FleetState>, SessionError> {
        self.state.lock().map_err(|_| SessionError::Poisoned)
    }
}

fn ensure_custom_root(slot: &mut HostSlot) {
    if slot.scope == ScanScope::CustomRoots && slot.roots.is_empty() {
        slot.roots.push(RootEntry::new(""));
    }
}

fn root_validation(root: &RootEntry) -> RootValidation {
    RootValidation {
        state: root.validation_state,
        message: root.status_message.clone(),
    }
}

fn result_message(status: RunState, result: &ScanResult) -> String {
    let base = if result.message.trim().is_empty() {
        status.default_status_text().to_string()
    } else {
        result.message.clone()
    };
    if status == RunState::Failed && result.availability != Availability::Unknown {
        format!("{base} ({})", result.availability.label())
    } else {
        base
    }
}
