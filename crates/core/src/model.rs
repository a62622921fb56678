use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanScope {
    #[default]
    AllDrives,
    SingleDrive,
    CustomRoots,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    #[default]
    Pending,
    Valid,
    Invalid,
}

/// Per-host lifecycle within a session.
///
/// Within one run a host only moves forward through
/// `Idle -> Queued -> Running -> terminal`; disabling forces `Skipped` and
/// re-enabling resets to `Idle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cached,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Skipped | RunState::Cached
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Cached)
    }

    /// Status text used when a progress event or result carries no message.
    pub fn default_status_text(self) -> &'static str {
        match self {
            RunState::Idle => "Ready",
            RunState::Queued => "Queued",
            RunState::Running => "Scanning",
            RunState::Succeeded => "Completed",
            RunState::Failed => "Failed",
            RunState::Skipped => "Skipped",
            RunState::Cached => "Using cached result",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Skipped => "skipped",
            RunState::Cached => "cached",
        }
    }

    pub(crate) fn rank(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Queued => 1,
            RunState::Running => 2,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootEntry {
    pub path: String,
    #[serde(default)]
    pub validation_state: ValidationState,
    #[serde(default)]
    pub status_message: String,
}

impl RootEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            validation_state: ValidationState::Pending,
            status_message: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSlot {
    pub host_id: String,
    pub label: String,
    pub enabled: bool,
    pub scope: ScanScope,
    pub roots: Vec<RootEntry>,
    #[serde(default)]
    pub run_state: RunState,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_include_in_export")]
    pub include_in_export: bool,
}

fn default_include_in_export() -> bool {
    true
}

impl HostSlot {
    pub fn new(host_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            label: label.into(),
            enabled: true,
            scope: ScanScope::AllDrives,
            roots: Vec::new(),
            run_state: RunState::Idle,
            status_text: String::new(),
            last_run_at: None,
            include_in_export: true,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        self.host_id.eq_ignore_ascii_case(key) || self.label.eq_ignore_ascii_case(key)
    }

    pub fn roots_ready(&self) -> bool {
        !self.roots.is_empty()
            && self
                .roots
                .iter()
                .all(|root| root.validation_state == ValidationState::Valid)
    }

    pub(crate) fn set_state(&mut self, state: RunState, message: impl Into<String>) {
        self.run_state = state;
        self.status_text = message.into();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanPlan {
    pub host_id: String,
    pub label: String,
    pub scope: ScanScope,
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub prefer_baseline: bool,
    #[serde(default)]
    pub baseline_priority: u32,
    #[serde(default = "default_include_in_export")]
    pub include_in_export: bool,
    #[serde(default)]
    pub include_drilldown: bool,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanProgress {
    pub host_id: String,
    pub status: RunState,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanProgress {
    pub fn new(host_id: impl Into<String>, status: RunState, message: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    Unknown,
    Offline,
    PermissionDenied,
    TimedOut,
    Unreachable,
}

impl Availability {
    pub fn label(self) -> &'static str {
        match self {
            Availability::Unknown => "Unknown",
            Availability::Offline => "Offline",
            Availability::PermissionDenied => "Permission denied",
            Availability::TimedOut => "Timed out",
            Availability::Unreachable => "Unreachable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub host_id: String,
    #[serde(default)]
    pub label: String,
    pub status: RunState,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub used_cache: bool,
    #[serde(default)]
    pub availability: Availability,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Full,
    Partial,
    #[default]
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub config_id: String,
    pub display_name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub drift_count: u64,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub present_hosts: Vec<String>,
    #[serde(default)]
    pub missing_hosts: Vec<String>,
    #[serde(default)]
    pub coverage_status: CoverageStatus,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_secrets: bool,
    #[serde(default)]
    pub is_masked: bool,
    #[serde(default)]
    pub has_validation_issues: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrilldownEntry {
    pub config_id: String,
    pub host_id: String,
    #[serde(default)]
    pub drift_count: u64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanResponse {
    #[serde(default)]
    pub results: Vec<ScanResult>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
    #[serde(default)]
    pub drilldown: Option<Vec<DrilldownEntry>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    NothingToRun,
    AlreadyInProgress,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
    #[serde(default)]
    pub planned: usize,
    #[serde(default)]
    pub cached_count: usize,
    #[serde(default)]
    pub attention_hosts: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
