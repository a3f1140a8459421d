//! Variable engine for the reef shell.
//!
//! This crate owns variable resolution across nested lexical scopes (function
//! calls, loops, blocks), the process-global scope, and the cross-process
//! universal scope provided by `reef-uvar`. It also builds the two derived
//! read-side views: the `NAME=VALUE` export array handed to child processes
//! and immutable snapshots for background completion/highlighting workers.
//!
//! All state lives in an explicit [`EnvStack`] handle; there are no ambient
//! globals, so tests can run any number of independent stacks.

mod config;
mod error;
mod export;
mod flags;
mod snapshot;
mod stack;
mod var;

pub use config::{default_uvar_path, ConfigPaths};
pub use error::{EnvError, EnvResult, ENV_OK};
pub use export::{ExportArray, ExportPolicy};
pub use flags::EnvMode;
pub use snapshot::{Snapshot, COMPLETING_KEYS, HIGHLIGHTING_KEYS};
pub use stack::{is_read_only, EnvStack, READ_ONLY_NAMES};
pub use var::{EnvVar, ARRAY_SEP, ARRAY_SEP_STR, ENV_NULL};
