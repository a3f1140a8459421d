//! Universal variables for the reef shell.
//!
//! Universal variables are shared by every reef process on the machine. Each
//! process works against a private in-memory cache; the caches are reconciled
//! through an append-only event store (one file per user, JSON Lines) at
//! explicit barrier points. Between barriers no cross-process traffic occurs.
//!
//! The store is the only ordering authority: when two processes race on the
//! same name, the event that landed later in the store wins, and every process
//! observes the same winner after its next barrier.

mod error;
mod store;
mod sync;

pub use error::{UvarError, UvarResult};
pub use store::{FileStore, MemStore, UvarEvent, UvarStore};
pub use sync::{UvarRecord, UvarSynchronizer};
