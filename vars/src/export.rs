//! The cached `NAME=VALUE` array handed to child-process creation.

use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};

use crate::var::ARRAY_SEP;

/// Name-keyed join convention for serializing array values into the child
/// environment.
///
/// Internally array elements are joined with the record separator; child
/// processes expect something conventional instead. Path-like variables join
/// with `:`, everything else with a space. The table is pluggable because the
/// right convention is a property of the consuming program, not of this
/// engine.
#[derive(Debug, Clone)]
pub struct ExportPolicy {
    joins: HashMap<String, char>,
    default_join: char,
}

impl Default for ExportPolicy {
    fn default() -> Self {
        let mut joins = HashMap::new();
        for name in ["PATH", "CDPATH", "MANPATH"] {
            joins.insert(name.to_string(), ':');
        }
        Self {
            joins,
            default_join: ' ',
        }
    }
}

impl ExportPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the join character for one variable name.
    pub fn set_join(&mut self, name: impl Into<String>, join: char) {
        self.joins.insert(name.into(), join);
    }

    #[must_use]
    pub fn join_for(&self, name: &str) -> char {
        self.joins.get(name).copied().unwrap_or(self.default_join)
    }

    /// Rewrites the internal separator to the per-name join character.
    #[must_use]
    pub fn serialize(&self, name: &str, value: &str) -> String {
        if !value.contains(ARRAY_SEP) {
            return value.to_string();
        }
        let join = self.join_for(name);
        value.replace(ARRAY_SEP, &join.to_string())
    }
}

/// A built export environment: owned C strings plus a null-terminated pointer
/// vector suitable for `execv`-style process creation.
///
/// Valid until the next invalidating mutation of the stack; callers must
/// treat it as a snapshot, not a live view.
#[derive(Debug)]
pub struct ExportArray {
    strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl ExportArray {
    /// Builds from already-serialized `(name, value)` pairs.
    pub(crate) fn build(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut strings = Vec::new();
        for (name, value) in entries {
            match CString::new(format!("{name}={value}")) {
                Ok(cs) => strings.push(cs),
                Err(_) => {
                    // A NUL inside a value cannot cross the exec boundary.
                    tracing::debug!(name = %name, "dropping variable with interior NUL from export array");
                }
            }
        }
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Self { strings, ptrs }
    }

    /// Null-terminated `char **` view for process creation. The pointers stay
    /// valid for the lifetime of this array.
    #[must_use]
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    /// Number of `NAME=VALUE` entries (the terminating null excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.strings.iter().map(CString::as_c_str)
    }
}
