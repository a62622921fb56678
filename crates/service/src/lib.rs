pub mod replay;
pub mod service;
pub mod store;

pub use replay::{load_response, ReplayCapability};
pub use service::{
    build_orchestrator, cancel_run, close_session, export_diagnostics_bundle, get_session,
    load_config, open_session, poll_session_events, save_session, start_run, CancelRunResponse,
    FleetSessionSnapshot, SequencedEvent, SessionRequest,
};
pub use store::JsonFileSessionStore;
