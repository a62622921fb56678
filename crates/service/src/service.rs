use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use fleet_drift_core::{
    build_diagnostics_bundle, CatalogItemView, DiagnosticsBundle, HostConfig, HostSlot,
    Orchestrator, OrchestratorConfig, RunOutcome, RunRequest, SessionEvent, SessionSnapshot,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::replay::ReplayCapability;
use crate::store::JsonFileSessionStore;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Session snapshot to restore hosts from; also the target of `save_session`.
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    /// Hosts added when no session file is given.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    /// Recorded scan response the replay backend plays back.
    pub response_path: PathBuf,
    #[serde(default)]
    pub host_delay_ms: u64,
    #[serde(default)]
    pub config: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: SessionEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSessionSnapshot {
    pub session_id: String,
    pub running: bool,
    pub hosts: Vec<HostSlot>,
    pub last_outcome: Option<RunOutcome>,
    pub catalog: Vec<CatalogItemView>,
    pub total_events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub session_id: String,
    pub cancelled: bool,
}

struct FleetSession {
    orchestrator: Arc<Orchestrator>,
    events: Arc<Mutex<Vec<SequencedEvent>>>,
    session_path: Option<PathBuf>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, FleetSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn load_config(path: impl AsRef<Path>) -> Result<OrchestratorConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: OrchestratorConfig = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

/// Builds an orchestrator backed by a replayed scan response and restores its
/// hosts from `session_path` when that file exists.
pub fn build_orchestrator(
    response_path: impl AsRef<Path>,
    session_path: Option<&Path>,
    config: OrchestratorConfig,
    host_delay: Duration,
) -> Result<Orchestrator> {
    let capability = ReplayCapability::from_file(response_path)?.with_host_delay(host_delay);
    let orchestrator = Orchestrator::new(Arc::new(capability), config);
    if let Some(path) = session_path {
        let store = JsonFileSessionStore::new(path);
        if !orchestrator.load_from(&store)? {
            bail!("session file not found: {}", path.display());
        }
    }
    Ok(orchestrator)
}

pub fn open_session(request: SessionRequest) -> Result<String> {
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if lock_sessions()?.contains_key(&session_id) {
        bail!("session already open: {session_id}");
    }

    let capability = ReplayCapability::from_file(&request.response_path)?
        .with_host_delay(Duration::from_millis(request.host_delay_ms));
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(capability), request.config));
    let events = Arc::new(Mutex::new(Vec::new()));
    forward_events(&orchestrator, Arc::clone(&events));

    match &request.session_path {
        Some(path) => {
            let store = JsonFileSessionStore::new(path);
            if !orchestrator.load_from(&store)? {
                info!(path = %path.display(), "no saved session; starting empty");
            }
        }
        None => orchestrator.restore(SessionSnapshot {
            hosts: request.hosts,
            ..SessionSnapshot::default()
        })?,
    }

    lock_sessions()?.insert(
        session_id.clone(),
        FleetSession {
            orchestrator,
            events,
            session_path: request.session_path,
        },
    );
    info!(%session_id, "session opened");
    Ok(session_id)
}

/// Starts a run on a background thread and returns immediately.
pub fn start_run(session_id: &str, request: RunRequest) -> Result<()> {
    let orchestrator = session_orchestrator(session_id)?;
    if orchestrator.is_running() {
        bail!("a scan is already in progress for session {session_id}");
    }

    let thread_session_id = session_id.to_string();
    thread::spawn(move || {
        let outcome = orchestrator.run(&request);
        info!(
            session_id = %thread_session_id,
            status = ?outcome.status,
            "session run finished"
        );
    });
    Ok(())
}

pub fn poll_session_events(session_id: &str, from_seq: u64) -> Result<Vec<SequencedEvent>> {
    let events = session_events(session_id)?;
    let events = events
        .lock()
        .map_err(|_| anyhow!("session event log lock poisoned"))?;
    Ok(events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

pub fn cancel_run(session_id: &str) -> Result<CancelRunResponse> {
    let orchestrator = session_orchestrator(session_id)?;
    Ok(CancelRunResponse {
        session_id: session_id.to_string(),
        cancelled: orchestrator.cancel(),
    })
}

pub fn get_session(session_id: &str) -> Result<FleetSessionSnapshot> {
    let orchestrator = session_orchestrator(session_id)?;
    let total_events = session_events(session_id)?
        .lock()
        .map(|events| events.len() as u64)
        .map_err(|_| anyhow!("session event log lock poisoned"))?;

    Ok(FleetSessionSnapshot {
        session_id: session_id.to_string(),
        running: orchestrator.is_running(),
        hosts: orchestrator.hosts()?,
        last_outcome: orchestrator.last_outcome()?,
        catalog: orchestrator.catalog_view()?,
        total_events,
    })
}

/// Writes the session's host configuration to `output`, or to the file it
/// was opened from.
pub fn save_session(session_id: &str, output: Option<&Path>) -> Result<PathBuf> {
    let (orchestrator, opened_from) = {
        let sessions = lock_sessions()?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
        (
            Arc::clone(&session.orchestrator),
            session.session_path.clone(),
        )
    };
    let path = output
        .map(Path::to_path_buf)
        .or(opened_from)
        .ok_or_else(|| anyhow!("no session file to save to for {session_id}"))?;

    orchestrator.persist(&JsonFileSessionStore::new(&path))?;
    Ok(path)
}

pub fn close_session(session_id: &str) -> Result<()> {
    let session = lock_sessions()?
        .remove(session_id)
        .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
    if session.orchestrator.cancel() {
        warn!(%session_id, "closed session with a run in flight");
    }
    Ok(())
}

pub fn export_diagnostics_bundle(
    session_id: &str,
    output: impl AsRef<Path>,
) -> Result<DiagnosticsBundle> {
    let output = output.as_ref();
    let orchestrator = session_orchestrator(session_id)?;
    let bundle = build_diagnostics_bundle(&orchestrator)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, bundle.to_pretty_json()?)
        .with_context(|| format!("failed to write diagnostics to {}", output.display()))?;
    Ok(bundle)
}

fn forward_events(orchestrator: &Orchestrator, events: Arc<Mutex<Vec<SequencedEvent>>>) {
    let rx = orchestrator.subscribe();
    thread::spawn(move || {
        for event in rx {
            let Ok(mut events) = events.lock() else {
                break;
            };
            let seq = events.len() as u64 + 1;
            events.push(SequencedEvent { seq, event });
        }
    });
}

fn session_orchestrator(session_id: &str) -> Result<Arc<Orchestrator>> {
    let sessions = lock_sessions()?;
    sessions
        .get(session_id)
        .map(|session| Arc::clone(&session.orchestrator))
        .ok_or_else(|| anyhow!("session not found: {session_id}"))
}

fn session_events(session_id: &str) -> Result<Arc<Mutex<Vec<SequencedEvent>>>> {
    let sessions = lock_sessions()?;
    sessions
        .get(session_id)
        .map(|session| Arc::clone(&session.events))
        .ok_or_else(|| anyhow!("session not found: {session_id}"))
}

fn lock_sessions() -> Result<MutexGuard<'static, HashMap<String, FleetSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("session registry lock poisoned"))
}
