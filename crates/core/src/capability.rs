use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use thiserror::Error;

use crate::model::{ScanPlan, ScanProgress, ScanResponse};

/// Errors a scan capability may raise for a whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The caller asked for the run to stop and the capability honored it.
    #[error("scan cancelled")]
    Cancelled,

    #[error("scan failed: {0}")]
    Failed(String),
}

impl ScanError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Cooperative cancellation flag threaded through one outstanding scan call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Convenience for capabilities polling between hosts.
    pub fn check(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Hands progress events to the orchestrator's consumer queue.
///
/// Safe to clone and use from any thread the capability spawns, but clones
/// must not outlive the `run_scans` call.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Sender<ScanProgress>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ScanProgress>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, progress: ScanProgress) {
        // The receiver only goes away once the run has been abandoned.
        let _ = self.tx.send(progress);
    }
}

/// External service that performs the per-host drift scans.
pub trait ScanCapability: Send + Sync {
    fn run_scans(
        &self,
        plans: &[ScanPlan],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanResponse, ScanError>;
}
