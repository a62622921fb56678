pub mod activity;
pub mod capability;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod markdown;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod validate;

pub use activity::{ActivityEntry, ActivityLog, ActivitySeverity, ActivitySink};
pub use capability::{CancellationToken, ProgressSink, ScanCapability, ScanError};
pub use catalog::{
    severity_rank, sort_items, Catalog, CatalogItemView, CatalogQuery, CoverageFilter, SortColumn,
    SortDirection,
};
pub use config::OrchestratorConfig;
pub use diagnostics::{build_diagnostics_bundle, DiagnosticsBundle, DiagnosticsEnvironment};
pub use markdown::render_run_summary;
pub use model::{
    Availability, CatalogEntry, CoverageStatus, DrilldownEntry, HostSlot, RootEntry, RunOutcome,
    RunState, RunStatus, ScanPlan, ScanProgress, ScanResponse, ScanResult, ScanScope,
    ValidationState,
};
pub use orchestrator::{Orchestrator, RunRequest};
pub use planner::{build_plans, PlanBatch, PlanOptions};
pub use session::{HostConfig, SessionError, SessionEvent, SessionSnapshot, SessionStore};
pub use validate::{RootValidation, RootValidator};
