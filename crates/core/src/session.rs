use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::ActivityEntry;
use crate::catalog::{CatalogItemView, CatalogQuery};
use crate::model::{HostSlot, RootEntry, RunOutcome, RunState, ScanScope};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("host id must not be blank")]
    BlankHostId,

    /// Host ids are never reused within a session, even after removal.
    #[error("host id already used in this session: {0}")]
    DuplicateHost(String),

    #[error("root index {index} out of range for host {host_id}")]
    UnknownRoot { host_id: String, index: usize },

    #[error("host {0} must keep at least one custom root")]
    LastRoot(String),

    #[error("a scan run is in progress")]
    RunInProgress,

    #[error("session state lock poisoned")]
    Poisoned,
}

/// Persisted configuration of one host; run state is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    pub host_id: String,
    pub label: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scope: ScanScope,
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default = "default_enabled")]
    pub include_in_export: bool,
}

fn default_enabled() -> bool {
    true
}

impl HostConfig {
    pub fn into_slot(self) -> HostSlot {
        let mut slot = HostSlot::new(self.host_id, self.label);
        slot.enabled = self.enabled;
        slot.scope = self.scope;
        slot.roots = self.roots.into_iter().map(RootEntry::new).collect();
        slot.include_in_export = self.include_in_export;
        if !slot.enabled {
            slot.set_state(RunState::Skipped, "Disabled");
        }
        slot
    }
}

impl From<&HostSlot> for HostConfig {
    fn from(slot: &HostSlot) -> Self {
        Self {
            host_id: slot.host_id.clone(),
            label: slot.label.clone(),
            enabled: slot.enabled,
            scope: slot.scope,
            roots: slot.roots.iter().map(|root| root.path.clone()).collect(),
            include_in_export: slot.include_in_export,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub catalog_query: CatalogQuery,
}

/// External persistence for session snapshots.
pub trait SessionStore {
    fn load(&self) -> Result<Option<SessionSnapshot>>;
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Change notifications published to subscribers after each mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    HostUpdated {
        host_id: String,
        run_state: RunState,
        status_text: String,
    },
    RunStarted {
        run_id: String,
        planned: usize,
    },
    RunFinished {
        outcome: RunOutcome,
    },
    CatalogReplaced {
        items: Vec<CatalogItemView>,
    },
    Activity {
        entry: ActivityEntry,
    },
}
