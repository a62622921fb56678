use std::env;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityEntry;
use crate::model::{HostSlot, RunOutcome};
use crate::orchestrator::Orchestrator;
use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsBundle {
    pub generated_at: String,
    pub snapshot: SessionSnapshot,
    pub hosts: Vec<HostSlot>,
    pub last_outcome: Option<RunOutcome>,
    pub activity: Vec<ActivityEntry>,
    pub catalog_entries: usize,
    pub environment: DiagnosticsEnvironment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsEnvironment {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub app_version: String,
}

pub fn build_diagnostics_bundle(orchestrator: &Orchestrator) -> Result<DiagnosticsBundle> {
    let snapshot = orchestrator.snapshot()?;
    let catalog_entries = orchestrator
        .query_catalog(&Default::default())
        .map(|items| items.len())?;

    Ok(DiagnosticsBundle {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        snapshot,
        hosts: orchestrator.hosts()?,
        last_outcome: orchestrator.last_outcome()?,
        activity: orchestrator.activity()?,
        catalog_entries,
        environment: DiagnosticsEnvironment {
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            current_dir: env::current_dir()
                .ok()
                .map(|path| path.to_string_lossy().to_string()),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

impl DiagnosticsBundle {
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize diagnostics bundle")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::build_diagnostics_bundle;
    use crate::capability::{CancellationToken, ProgressSink, ScanCapability, ScanError};
    use crate::config::OrchestratorConfig;
    use crate::model::{ScanPlan, ScanResponse};
    use crate::orchestrator::Orchestrator;

    struct Idle;

    impl ScanCapability for Idle {
        fn run_scans(
            &self,
            _plans: &[ScanPlan],
            _progress: &ProgressSink,
            _cancel: &CancellationToken,
        ) -> Result<ScanResponse, ScanError> {
            Ok(ScanResponse::default())
        }
    }

    #[test]
    fn bundle_embeds_hosts_and_activity() {
        let orchestrator = Orchestrator::new(Arc::new(Idle), OrchestratorConfig::default());
        orchestrator.add_host("web-01", "Web").expect("add host");

        let bundle = build_diagnostics_bundle(&orchestrator).expect("bundle builds");
        assert_eq!(bundle.snapshot.hosts.len(), 1);
        assert_eq!(bundle.hosts[0].host_id, "web-01");
        assert!(!bundle.activity.is_empty());
        assert!(bundle.last_outcome.is_none());

        let json = bundle.to_pretty_json().expect("serializes");
        assert!(json.contains("\"app_version\""));
    }
}
