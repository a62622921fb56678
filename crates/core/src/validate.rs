use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ScanScope, ValidationState};

pub const MSG_BLANK: &str = "Provide a root path";
pub const MSG_DUPLICATE: &str = "Duplicate root for this host";
pub const MSG_SCOPE_UNUSED: &str = "Roots not used for this scope";
pub const MSG_NOT_ABSOLUTE: &str = "Path must be absolute";
pub const MSG_READY: &str = "Ready";
pub const MSG_NOT_FOUND: &str = "Path not found";

static SHARED: Lazy<Arc<RootValidator>> = Lazy::new(|| Arc::new(RootValidator::new()));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootValidation {
    pub state: ValidationState,
    pub message: String,
}

impl RootValidation {
    fn new(state: ValidationState, message: &str) -> Self {
        Self {
            state,
            message: message.to_string(),
        }
    }
}

/// Checks candidate scan roots and remembers every path it has seen exist.
///
/// Only `Valid` outcomes are cached; a `Pending` or `Invalid` path is always
/// rechecked so a share that was not mounted yet can become valid later.
/// Cached entries are never evicted for the lifetime of the validator.
#[derive(Debug, Default)]
pub struct RootValidator {
    valid_paths: Mutex<HashSet<String>>,
}

impl RootValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide validator shared by every session.
    pub fn shared() -> Arc<RootValidator> {
        Arc::clone(&SHARED)
    }

    pub fn validate(
        &self,
        scope: ScanScope,
        candidate: &str,
        sibling_paths: &[&str],
    ) -> RootValidation {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return RootValidation::new(ValidationState::Invalid, MSG_BLANK);
        }

        let key = cache_key(candidate);
        if sibling_paths
            .iter()
            .any(|sibling| cache_key(sibling) == key)
        {
            return RootValidation::new(ValidationState::Invalid, MSG_DUPLICATE);
        }

        if scope != ScanScope::CustomRoots {
            return RootValidation::new(ValidationState::Pending, MSG_SCOPE_UNUSED);
        }

        if !is_absolute(candidate) {
            return RootValidation::new(ValidationState::Invalid, MSG_NOT_ABSOLUTE);
        }

        if self.is_cached(&key) {
            return RootValidation::new(ValidationState::Valid, MSG_READY);
        }

        if Path::new(candidate).exists() {
            self.remember(key);
            RootValidation::new(ValidationState::Valid, MSG_READY)
        } else {
            debug!("root {candidate} not found");
            RootValidation::new(ValidationState::Invalid, MSG_NOT_FOUND)
        }
    }

    pub fn cached_len(&self) -> usize {
        self.valid_paths.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn is_cached(&self, key: &str) -> bool {
        self.valid_paths
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }

    fn remember(&self, key: String) {
        if let Ok(mut set) = self.valid_paths.lock() {
            set.insert(key);
        }
    }
}

fn cache_key(path: &str) -> String {
    path.trim().to_lowercase()
}

fn is_absolute(path: &str) -> bool {
    path.starts_with(r"\\") || Path::new(path).is_absolute()
}
