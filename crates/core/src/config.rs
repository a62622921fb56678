use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    #[serde(default = "default_activity_log_capacity")]
    pub activity_log_capacity: usize,
    /// How often the consumer checks whether the scan call has returned while
    /// no progress is arriving.
    #[serde(default = "default_progress_poll_interval_ms")]
    pub progress_poll_interval_ms: u64,
    #[serde(default = "default_include_drilldown")]
    pub include_drilldown: bool,
}

fn default_activity_log_capacity() -> usize {
    200
}

fn default_progress_poll_interval_ms() -> u64 {
    25
}

fn default_include_drilldown() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            activity_log_capacity: default_activity_log_capacity(),
            progress_poll_interval_ms: default_progress_poll_interval_ms(),
            include_drilldown: default_include_drilldown(),
        }
    }
}

impl OrchestratorConfig {
    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_interval_ms.max(1))
    }
}
