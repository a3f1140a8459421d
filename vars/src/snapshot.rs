//! Point-in-time variable snapshots for background workers.

use std::collections::HashMap;

use crate::var::EnvVar;

/// Variables the syntax-highlighting worker needs.
pub const HIGHLIGHTING_KEYS: &[&str] = &["PATH", "CDPATH", "HOME", "PWD", "reef_function_path"];

/// Variables the completion worker needs.
pub const COMPLETING_KEYS: &[&str] = &[
    "PATH",
    "CDPATH",
    "HOME",
    "reef_function_path",
    "reef_complete_path",
];

/// An immutable copy of the resolved variable view.
///
/// Snapshots are plain owned data (`Send + Sync`); a worker thread holds its
/// own copy and can never observe a later mutation of the live stack, torn or
/// otherwise.
#[derive(Debug, Clone)]
pub struct Snapshot {
    vars: HashMap<String, EnvVar>,
}

impl Snapshot {
    pub(crate) fn from_vars(vars: HashMap<String, EnvVar>) -> Self {
        Self { vars }
    }

    /// Same missing-or-present shape as the live stack's `get`.
    #[must_use]
    pub fn get(&self, name: &str) -> EnvVar {
        self.vars.get(name).cloned().unwrap_or_else(EnvVar::missing_var)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}
