use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fleet_drift_core::{
    CancellationToken, ProgressSink, RunState, ScanCapability, ScanError, ScanPlan, ScanProgress,
    ScanResponse, ScanResult,
};
use tracing::debug;

pub fn load_response(path: impl AsRef<Path>) -> Result<ScanResponse> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read scan response {}", path.display()))?;
    let response: ScanResponse = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(response)
}

/// Scan backend that plays back a recorded [`ScanResponse`].
///
/// Hosts are visited in plan order; each one reports `Running`, waits for the
/// configured delay, then reports its recorded terminal state. Hosts without
/// a recorded result get no terminal progress and no result.
#[derive(Debug, Clone)]
pub struct ReplayCapability {
    response: ScanResponse,
    host_delay: Duration,
}

impl ReplayCapability {
    pub fn new(response: ScanResponse) -> Self {
        Self {
            response,
            host_delay: Duration::ZERO,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_response(path).map(Self::new)
    }

    pub fn with_host_delay(mut self, delay: Duration) -> Self {
        self.host_delay = delay;
        self
    }

    fn recorded(&self, host_id: &str) -> Option<&ScanResult> {
        self.response
            .results
            .iter()
            .find(|result| result.host_id.eq_ignore_ascii_case(host_id))
    }
}

impl ScanCapability for ReplayCapability {
    fn run_scans(
        &self,
        plans: &[ScanPlan],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanResponse, ScanError> {
        let mut results = Vec::with_capacity(plans.len());

        for plan in plans {
            cancel.check()?;
            progress.emit(ScanProgress::new(&plan.host_id, RunState::Running, "Scanning"));
            if !self.host_delay.is_zero() {
                thread::sleep(self.host_delay);
            }
            cancel.check()?;

            let Some(recorded) = self.recorded(&plan.host_id) else {
                debug!(host_id = %plan.host_id, "no recorded result for host");
                continue;
            };
            let mut result = recorded.clone();
            result.host_id = plan.host_id.clone();
            if !result.used_cache {
                result.timestamp = Utc::now();
            }
            let state = if result.used_cache {
                RunState::Cached
            } else {
                result.status
            };
            progress.emit(ScanProgress {
                host_id: plan.host_id.clone(),
                status: state,
                message: result.message.clone(),
                timestamp: result.timestamp,
            });
            results.push(result);
        }

        let wants_drilldown = plans.iter().any(|plan| plan.include_drilldown);
        Ok(ScanResponse {
            results,
            catalog: self.response.catalog.clone(),
            drilldown: self
                .response
                .drilldown
                .clone()
                .filter(|_| wants_drilldown),
        })
    }
}
