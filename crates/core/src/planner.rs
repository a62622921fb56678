use serde::{Deserialize, Serialize};

use crate::model::{HostSlot, RunState, ScanPlan, ScanScope};

pub const MSG_QUEUED: &str = "Queued";
pub const MSG_USING_CACHE: &str = "Using cached result";
pub const MSG_INVALID_ROOTS: &str = "Invalid roots";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanBatch {
    pub plans: Vec<ScanPlan>,
    pub cached_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub retry_only: bool,
    pub include_drilldown: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            retry_only: false,
            include_drilldown: true,
        }
    }
}

/// Turns enabled host slots into scan plans, recording every exclusion on the
/// slot itself instead of failing.
///
/// A non-empty `scoped_host_ids` keeps only slots whose id or label matches
/// one entry; the rest are left untouched.
pub fn build_plans(
    slots: &mut [HostSlot],
    options: PlanOptions,
    scoped_host_ids: &[String],
) -> PlanBatch {
    let mut batch = PlanBatch::default();

    for slot in slots.iter_mut().filter(|slot| slot.enabled) {
        if !scoped_host_ids.is_empty() && !scoped_host_ids.iter().any(|key| slot.matches(key)) {
            continue;
        }

        if options.retry_only && slot.run_state.is_success() {
            slot.set_state(RunState::Cached, MSG_USING_CACHE);
            batch.cached_count += 1;
            continue;
        }

        if slot.scope == ScanScope::CustomRoots && !slot.roots_ready() {
            slot.set_state(RunState::Failed, MSG_INVALID_ROOTS);
            continue;
        }

        let roots = if slot.scope == ScanScope::CustomRoots {
            slot.roots.iter().map(|root| root.path.clone()).collect()
        } else {
            Vec::new()
        };

        batch.plans.push(ScanPlan {
            host_id: slot.host_id.clone(),
            label: slot.label.clone(),
            scope: slot.scope,
            roots,
            prefer_baseline: batch.plans.is_empty(),
            baseline_priority: batch.plans.len() as u32,
            include_in_export: slot.include_in_export,
            include_drilldown: options.include_drilldown,
            cached_at: slot.last_run_at,
        });
        slot.set_state(RunState::Queued, MSG_QUEUED);
    }

    batch
}
