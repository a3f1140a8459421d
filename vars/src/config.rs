use std::path::PathBuf;

/// Well-known installation directories, determined by the launcher and handed
/// to [`EnvStack::init`](crate::EnvStack::init) before any other call.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// e.g. /usr/local/share
    pub data: PathBuf,
    /// e.g. /usr/local/etc
    pub sysconf: PathBuf,
    /// e.g. /usr/local/share/doc/reef
    pub doc: PathBuf,
    /// e.g. /usr/local/bin
    pub bin: PathBuf,
}

/// Default location of the shared universal-variable store for this user.
#[must_use]
pub fn default_uvar_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reef")
        .join("universal.vars")
}
