//! Durable event store for universal variables.
//!
//! The store is an append-only log of [`UvarEvent`] records. Append order is
//! the one source of truth for conflict resolution: whichever event for a name
//! lands later in the log wins, regardless of wall-clock time on the writing
//! process.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{UvarError, UvarResult};

/// One record in the universal-variable log, serialized as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum UvarEvent {
    /// A variable was set (or re-set) to `value`.
    Set {
        name: String,
        value: String,
        #[serde(default)]
        exported: bool,
    },
    /// A variable was erased.
    Erase { name: String },
}

impl UvarEvent {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. } | Self::Erase { name } => name,
        }
    }
}

/// Backing store for universal variables.
///
/// `exchange` is the single operation: it appends the caller's pending events
/// and reads back the complete history, both under the store's own exclusion
/// discipline. A synchronizer rebuilds its cache by replaying the returned
/// history in order.
pub trait UvarStore: Send {
    /// Appends `pending` and returns (full history in append order, generation).
    ///
    /// The generation is the total event count after the append; it only ever
    /// decreases when the store compacts its log.
    fn exchange(&mut self, pending: &[UvarEvent]) -> UvarResult<(Vec<UvarEvent>, u64)>;
}

const LOCK_ATTEMPTS: u32 = 100;
const LOCK_RETRY: Duration = Duration::from_millis(10);
/// A lock file older than this is assumed to belong to a dead process.
const STALE_LOCK: Duration = Duration::from_secs(10);
/// Compact when the log holds this many times more events than live names.
const COMPACT_FACTOR: usize = 8;
const COMPACT_MIN_EVENTS: usize = 64;

/// File-backed store shared between reef processes.
///
/// Exclusion uses a sibling `.lock` file created with `create_new`; a crashed
/// holder is detected by lock-file age and its lock is broken.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_os = path.as_os_str().to_owned();
        lock_os.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_os),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, pending: &[UvarEvent]) -> UvarResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| UvarError::WriteStore {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let mut buf = String::new();
        for event in pending {
            // serde_json cannot fail on these enums, but route it through the
            // store error anyway rather than panicking.
            let line = serde_json::to_string(event).map_err(|e| UvarError::WriteStore {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| UvarError::WriteStore {
                path: self.path.clone(),
                source: e,
            })?;
        file.write_all(buf.as_bytes())
            .map_err(|e| UvarError::WriteStore {
                path: self.path.clone(),
                source: e,
            })
    }

    fn read_all(&self) -> UvarResult<Vec<UvarEvent>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(UvarError::ReadStore {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| UvarError::ReadStore {
                path: self.path.clone(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event =
                serde_json::from_str(&line).map_err(|e| UvarError::ParseRecord {
                    path: self.path.clone(),
                    line: idx + 1,
                    source: e,
                })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Rewrites the log as one `Set` per live name. Must hold the lock.
    fn compact(&self, events: &[UvarEvent]) -> UvarResult<Vec<UvarEvent>> {
        let mut live = std::collections::BTreeMap::new();
        for event in events {
            match event {
                UvarEvent::Set { name, .. } => {
                    live.insert(name.clone(), event.clone());
                }
                UvarEvent::Erase { name } => {
                    live.remove(name);
                }
            }
        }
        let compacted: Vec<UvarEvent> = live.into_values().collect();

        let tmp_path = self.path.with_extension("tmp");
        let mut buf = String::new();
        for event in &compacted {
            let line = serde_json::to_string(event).map_err(|e| UvarError::WriteStore {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }
        fs::write(&tmp_path, buf).map_err(|e| UvarError::WriteStore {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| UvarError::WriteStore {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(
            path = %self.path.display(),
            before = events.len(),
            after = compacted.len(),
            "compacted universal variable store"
        );
        Ok(compacted)
    }
}

impl UvarStore for FileStore {
    fn exchange(&mut self, pending: &[UvarEvent]) -> UvarResult<(Vec<UvarEvent>, u64)> {
        let _guard = LockGuard::acquire(&self.lock_path)?;
        self.append(pending)?;
        let mut events = self.read_all()?;

        let live = events
            .iter()
            .filter(|e| matches!(e, UvarEvent::Set { .. }))
            .map(UvarEvent::name)
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        if events.len() >= COMPACT_MIN_EVENTS && events.len() > live.max(1) * COMPACT_FACTOR {
            events = self.compact(&events)?;
        }

        let generation = events.len() as u64;
        Ok((events, generation))
    }
}

/// RAII lock on the store's sibling `.lock` file.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path) -> UvarResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| UvarError::WriteStore {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path) {
                        tracing::warn!(path = %path.display(), "breaking stale universal variable lock");
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(UvarError::WriteStore {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
        }
        Err(UvarError::LockTimeout {
            path: path.to_path_buf(),
            attempts: LOCK_ATTEMPTS,
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK)
}

/// In-process store, shareable between synchronizers by cloning.
///
/// Exists so the reconciliation algorithm can be exercised against synthetic
/// histories without touching the filesystem; also usable by embedders that
/// want universal variables scoped to a single process.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    events: Arc<Mutex<Vec<UvarEvent>>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UvarStore for MemStore {
    fn exchange(&mut self, pending: &[UvarEvent]) -> UvarResult<(Vec<UvarEvent>, u64)> {
        let mut events = self.events.lock().unwrap();
        events.extend_from_slice(pending);
        Ok((events.clone(), events.len() as u64))
    }
}
