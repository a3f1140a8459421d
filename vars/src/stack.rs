//! The scope stack resolver: get/set/remove with mode-flag precedence across
//! local, global, and universal scopes.

use std::collections::{BTreeSet, HashMap};

use reef_uvar::UvarSynchronizer;

use crate::config::ConfigPaths;
use crate::error::{EnvError, EnvResult};
use crate::export::{ExportArray, ExportPolicy};
use crate::flags::EnvMode;
use crate::snapshot::Snapshot;
use crate::var::{EnvVar, ARRAY_SEP_STR};

/// Names a USER-flagged request may not set or remove. Internal code can
/// still update them (PWD tracking, status propagation).
pub const READ_ONLY_NAMES: &[&str] = &["version", "status", "PWD", "SHLVL", "_"];

/// Setting this variable adjusts the enforced `read` byte ceiling.
const READ_LIMIT_VAR: &str = "reef_read_limit";
const DEFAULT_READ_LIMIT: u64 = 10 * 1024 * 1024;

/// Imported environment variables treated as colon-joined arrays.
const COLON_IMPORTS: &[&str] = &["PATH", "CDPATH", "MANPATH"];

#[must_use]
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_NAMES.contains(&name)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Derived state a mutation of `name` invalidates. Every mutating path goes
/// through [`invalidation_for`] so the coupling lives in one place.
struct Invalidation {
    export_array: bool,
    pwd_cache: bool,
    read_limit: bool,
}

fn invalidation_for(name: &str, touches_export: bool) -> Invalidation {
    Invalidation {
        export_array: touches_export,
        pwd_cache: name == "PWD",
        read_limit: name == READ_LIMIT_VAR,
    }
}

/// One entry in the local-scope stack.
#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, EnvVar>,
    /// Whether this frame isolates lookups from the caller's locals
    /// (function-call semantics) or shares them (block/loop semantics).
    new_scope: bool,
}

/// The live variable state of one shell process.
///
/// Single-threaded by design: mutations happen synchronously from the
/// command-execution path. Background workers read through [`Snapshot`]s,
/// never through a shared reference to this stack.
pub struct EnvStack {
    global: Frame,
    locals: Vec<Frame>,
    uvars: UvarSynchronizer,
    export_policy: ExportPolicy,
    export_cache: Option<ExportArray>,
    pwd_slash: String,
    read_byte_limit: u64,
}

impl Default for EnvStack {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvStack {
    /// A stack whose universal scope is process-local (no durable store).
    #[must_use]
    pub fn new() -> Self {
        Self::with_universal(UvarSynchronizer::in_memory())
    }

    /// A stack sharing universal variables through the given synchronizer.
    #[must_use]
    pub fn with_universal(uvars: UvarSynchronizer) -> Self {
        Self {
            global: Frame::default(),
            locals: Vec::new(),
            uvars,
            export_policy: ExportPolicy::new(),
            export_cache: None,
            pwd_slash: "/".to_string(),
            read_byte_limit: DEFAULT_READ_LIMIT,
        }
    }

    /// Establishes the well-known variables: imports the process environment
    /// (exported), seeds the installation directories, `version`, `SHLVL`,
    /// `PWD`, and the read limit. Call once before anything else.
    pub fn init(&mut self, paths: Option<&ConfigPaths>) {
        for (name, value) in std::env::vars() {
            if !valid_name(&name) {
                continue;
            }
            let stored = if COLON_IMPORTS.contains(&name.as_str()) {
                value.split(':').collect::<Vec<_>>().join(ARRAY_SEP_STR)
            } else {
                value
            };
            self.global
                .vars
                .insert(name, EnvVar::new(stored).exported(true));
        }

        let shlvl = self
            .global
            .vars
            .get("SHLVL")
            .and_then(|v| v.as_string().parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        self.global
            .vars
            .insert("SHLVL".to_string(), EnvVar::new(shlvl.to_string()).exported(true));

        self.global.vars.insert(
            "version".to_string(),
            EnvVar::new(env!("CARGO_PKG_VERSION")),
        );

        if let Some(paths) = paths {
            for (name, path) in [
                ("__reef_datadir", &paths.data),
                ("__reef_sysconfdir", &paths.sysconf),
                ("__reef_docdir", &paths.doc),
                ("__reef_bindir", &paths.bin),
            ] {
                self.global
                    .vars
                    .insert(name.to_string(), EnvVar::new(path.display().to_string()));
            }
        }

        self.set_pwd();
        self.refresh_read_limit();
        self.export_cache = None;
        tracing::debug!(shlvl, "variable stack initialized");
    }

    // ---- lookup -----------------------------------------------------------

    /// Local frames visible from the top of the stack: everything down to and
    /// including the first `new_scope` frame. A function boundary hides the
    /// caller's locals; block frames (`new_scope == false`) are transparent.
    fn visible_locals(&self) -> Vec<&Frame> {
        let mut out = Vec::new();
        for frame in self.locals.iter().rev() {
            out.push(frame);
            if frame.new_scope {
                break;
            }
        }
        out
    }

    fn universal_var(&self, name: &str) -> Option<EnvVar> {
        self.uvars
            .get(name)
            .map(|rec| EnvVar::new(&rec.value).exported(rec.exported))
    }

    /// Resolves `name` under `mode`. A scope flag restricts the search to
    /// that scope; the default walks local frames top-down, then global, then
    /// universal. Returns the missing entity when nothing is found.
    #[must_use]
    pub fn get(&self, name: &str, mode: EnvMode) -> EnvVar {
        if mode.contains(EnvMode::LOCAL) {
            return self
                .find_local(name)
                .cloned()
                .unwrap_or_else(EnvVar::missing_var);
        }
        if mode.contains(EnvMode::GLOBAL) {
            return self
                .global
                .vars
                .get(name)
                .cloned()
                .unwrap_or_else(EnvVar::missing_var);
        }
        if mode.contains(EnvMode::UNIVERSAL) {
            return self.universal_var(name).unwrap_or_else(EnvVar::missing_var);
        }

        if let Some(var) = self.find_local(name) {
            return var.clone();
        }
        if let Some(var) = self.global.vars.get(name) {
            return var.clone();
        }
        self.universal_var(name).unwrap_or_else(EnvVar::missing_var)
    }

    fn find_local(&self, name: &str) -> Option<&EnvVar> {
        self.visible_locals()
            .into_iter()
            .find_map(|frame| frame.vars.get(name))
    }

    /// Whether `name` resolves to anything under `mode`.
    #[must_use]
    pub fn exists(&self, name: &str, mode: EnvMode) -> bool {
        !self.get(name, mode).is_missing()
    }

    // ---- mutation ---------------------------------------------------------

    /// Sets `name` to `value` in the scope selected by `mode`.
    ///
    /// Without a scope flag an existing binding is updated in its current
    /// scope; otherwise the variable is created in the innermost local frame
    /// (global when no local frame exists). `EXPORT`/`UNEXPORT` update the
    /// export flag; absent both, the flag is left as it was.
    pub fn set(&mut self, name: &str, mode: EnvMode, value: &str) -> EnvResult<()> {
        if !valid_name(name) {
            return Err(EnvError::Invalid(name.to_string()));
        }
        if mode.is_conflicting() {
            return Err(EnvError::Scope(name.to_string()));
        }
        if mode.contains(EnvMode::USER) && is_read_only(name) {
            return Err(EnvError::Perm(name.to_string()));
        }

        let was_exported = self.exported_in_effect(name);
        let export_req = mode.export_request();

        if mode.contains(EnvMode::UNIVERSAL) {
            let exported = export_req
                .or_else(|| self.uvars.get(name).map(|r| r.exported))
                .unwrap_or(false);
            self.uvars.set(name, value.to_string(), exported);
        } else if mode.contains(EnvMode::GLOBAL) {
            Self::set_in_frame(&mut self.global, name, value, export_req);
        } else if mode.contains(EnvMode::LOCAL) {
            let frame = self.innermost_frame_mut();
            Self::set_in_frame(frame, name, value, export_req);
        } else if let Some(frame) = self.frame_holding_mut(name) {
            Self::set_in_frame(frame, name, value, export_req);
        } else if self.uvars.get(name).is_some() {
            let exported = export_req
                .or_else(|| self.uvars.get(name).map(|r| r.exported))
                .unwrap_or(false);
            self.uvars.set(name, value.to_string(), exported);
        } else {
            let frame = self.innermost_frame_mut();
            Self::set_in_frame(frame, name, value, export_req);
        }

        let now_exported = self.exported_in_effect(name);
        self.apply_invalidation(name, was_exported || now_exported);
        Ok(())
    }

    fn set_in_frame(frame: &mut Frame, name: &str, value: &str, export_req: Option<bool>) {
        if let Some(var) = frame.vars.get_mut(name) {
            var.set_val(value);
            if let Some(exported) = export_req {
                var.exported = exported;
            }
        } else {
            frame.vars.insert(
                name.to_string(),
                EnvVar::new(value).exported(export_req.unwrap_or(false)),
            );
        }
    }

    /// The frame a scopeless `set` of an existing binding updates: the
    /// visible local frame holding it, else global. Universal is handled by
    /// the caller.
    fn frame_holding_mut(&mut self, name: &str) -> Option<&mut Frame> {
        let mut depth = None;
        for (i, frame) in self.locals.iter().enumerate().rev() {
            if frame.vars.contains_key(name) {
                depth = Some(i);
                break;
            }
            if frame.new_scope {
                break;
            }
        }
        if let Some(i) = depth {
            return Some(&mut self.locals[i]);
        }
        if self.global.vars.contains_key(name) {
            return Some(&mut self.global);
        }
        None
    }

    fn innermost_frame_mut(&mut self) -> &mut Frame {
        self.locals.last_mut().unwrap_or(&mut self.global)
    }

    /// Removes `name` from the scope selected by `mode` (all scopes,
    /// innermost first, by default). Returns whether the variable existed.
    pub fn remove(&mut self, name: &str, mode: EnvMode) -> EnvResult<bool> {
        if mode.is_conflicting() {
            return Err(EnvError::Scope(name.to_string()));
        }
        if mode.contains(EnvMode::USER) && is_read_only(name) {
            return Err(EnvError::Perm(name.to_string()));
        }

        let was_exported = self.exported_in_effect(name);

        let existed = if mode.contains(EnvMode::LOCAL) {
            self.remove_local(name)
        } else if mode.contains(EnvMode::GLOBAL) {
            self.global.vars.remove(name).is_some()
        } else if mode.contains(EnvMode::UNIVERSAL) {
            self.uvars.remove(name)
        } else if self.remove_local(name) || self.global.vars.remove(name).is_some() {
            true
        } else {
            // No shadowing definition left; drop any universal one too.
            self.uvars.get(name).is_some() && self.uvars.remove(name)
        };

        // Removing a shadowing binding can expose an exported outer one.
        let now_exported = self.exported_in_effect(name);
        self.apply_invalidation(name, was_exported || now_exported);
        Ok(existed)
    }

    fn remove_local(&mut self, name: &str) -> bool {
        for frame in self.locals.iter_mut().rev() {
            if frame.vars.remove(name).is_some() {
                return true;
            }
            if frame.new_scope {
                break;
            }
        }
        false
    }

    /// Pushes a local frame. `new_scope` isolates the frame's lookups from
    /// the caller's locals (function call); otherwise the caller's bindings
    /// stay visible (block or loop body).
    pub fn push(&mut self, new_scope: bool) {
        self.locals.push(Frame {
            vars: HashMap::new(),
            new_scope,
        });
    }

    /// Pops the innermost local frame.
    ///
    /// # Panics
    ///
    /// Panics when no local frame is left; popping the global frame is a bug
    /// in the surrounding shell logic.
    pub fn pop(&mut self) {
        let Some(frame) = self.locals.pop() else {
            panic!("popped past the global frame");
        };
        for (name, var) in &frame.vars {
            // The popped binding may have shadowed an exported outer one.
            let unshadowed = self.exported_in_effect(name);
            self.apply_invalidation(name, var.exported || unshadowed);
        }
    }

    // ---- bulk views -------------------------------------------------------

    /// All visible names in the scopes `mode` selects (all scopes when no
    /// scope flag is set), sorted, without duplicates.
    #[must_use]
    pub fn get_names(&self, mode: EnvMode) -> Vec<String> {
        let all = mode.is_scopeless();
        let mut names = BTreeSet::new();
        if all || mode.contains(EnvMode::LOCAL) {
            for frame in self.visible_locals() {
                names.extend(frame.vars.keys().cloned());
            }
        }
        if all || mode.contains(EnvMode::GLOBAL) {
            names.extend(self.global.vars.keys().cloned());
        }
        if all || mode.contains(EnvMode::UNIVERSAL) {
            names.extend(self.uvars.names());
        }
        names.into_iter().collect()
    }

    /// Binds `argv` in the global scope as a list value.
    pub fn set_argv(&mut self, argv: &[String]) {
        self.global
            .vars
            .insert("argv".to_string(), EnvVar::from_list(argv));
    }

    /// Updates `PWD` from the real working directory. Returns false (and
    /// leaves the variable alone) when the working directory is unavailable.
    pub fn set_pwd(&mut self) -> bool {
        match std::env::current_dir() {
            Ok(dir) => {
                let dir = dir.display().to_string();
                // Internal update: PWD is read-only for USER requests only.
                self.set("PWD", EnvMode::GLOBAL | EnvMode::EXPORT, &dir)
                    .is_ok()
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot determine working directory for PWD");
                false
            }
        }
    }

    /// The working directory with a terminating slash, kept consistent with
    /// every mutation of `PWD`.
    #[must_use]
    pub fn pwd_slash(&self) -> &str {
        &self.pwd_slash
    }

    /// The enforced `read` byte ceiling, driven by `reef_read_limit`.
    #[must_use]
    pub fn read_byte_limit(&self) -> u64 {
        self.read_byte_limit
    }

    /// Flushes pending universal writes and pulls remote ones. The single
    /// blocking point of the engine; called between commands, not per access.
    pub fn universal_barrier(&mut self) {
        let changed = self.uvars.barrier();
        for name in &changed {
            // Export state of the remote winner is unknown in advance;
            // invalidate as if it were export-relevant.
            self.apply_invalidation(name, true);
        }
    }

    /// Whether the universal scope has degraded to session-local operation.
    #[must_use]
    pub fn universal_is_degraded(&self) -> bool {
        self.uvars.is_degraded()
    }

    /// Captures an immutable copy of the resolved view, or of `keys` only.
    #[must_use]
    pub fn snapshot(&self, keys: Option<&[&str]>) -> Snapshot {
        let vars = match keys {
            Some(keys) => {
                let mut vars = HashMap::new();
                for &key in keys {
                    let var = self.get(key, EnvMode::empty());
                    if !var.is_missing() {
                        vars.insert(key.to_string(), var);
                    }
                }
                vars
            }
            None => self.resolved_view(),
        };
        Snapshot::from_vars(vars)
    }

    /// The effective mapping after shadowing: universal, overridden by
    /// global, overridden by visible locals outermost to innermost.
    fn resolved_view(&self) -> HashMap<String, EnvVar> {
        let mut view: HashMap<String, EnvVar> = HashMap::new();
        for (name, rec) in self.uvars.iter() {
            view.insert(name.to_string(), EnvVar::new(&rec.value).exported(rec.exported));
        }
        for (name, var) in &self.global.vars {
            view.insert(name.clone(), var.clone());
        }
        for frame in self.visible_locals().into_iter().rev() {
            for (name, var) in &frame.vars {
                view.insert(name.clone(), var.clone());
            }
        }
        view
    }

    /// The cached `NAME=VALUE` array for child-process creation, rebuilt
    /// lazily after an invalidating mutation.
    pub fn export_array(&mut self) -> &ExportArray {
        if self.export_cache.is_none() {
            let mut entries: Vec<(String, String)> = self
                .resolved_view()
                .into_iter()
                .filter(|(_, var)| var.exported)
                .map(|(name, var)| {
                    let value = self.export_policy.serialize(&name, &var.as_string());
                    (name, value)
                })
                .collect();
            entries.sort();
            let arr = ExportArray::build(entries);
            tracing::trace!(entries = arr.len(), "rebuilt export array");
            self.export_cache = Some(arr);
        }
        self.export_cache.as_ref().unwrap()
    }

    /// Adjusting the join policy invalidates the cached array.
    pub fn export_policy_mut(&mut self) -> &mut ExportPolicy {
        self.export_cache = None;
        &mut self.export_policy
    }

    // ---- invalidation -----------------------------------------------------

    /// The effective export flag of `name` in the resolved view.
    fn exported_in_effect(&self, name: &str) -> bool {
        self.get(name, EnvMode::empty()).exported
    }

    fn apply_invalidation(&mut self, name: &str, touches_export: bool) {
        let inval = invalidation_for(name, touches_export);
        if inval.export_array {
            self.export_cache = None;
        }
        if inval.pwd_cache {
            self.refresh_pwd_cache();
        }
        if inval.read_limit {
            self.refresh_read_limit();
        }
    }

    fn refresh_pwd_cache(&mut self) {
        let pwd = self.get("PWD", EnvMode::empty());
        let mut s = if pwd.is_missing() {
            String::new()
        } else {
            pwd.as_string()
        };
        if !s.ends_with('/') {
            s.push('/');
        }
        self.pwd_slash = s;
    }

    fn refresh_read_limit(&mut self) {
        let var = self.get(READ_LIMIT_VAR, EnvMode::empty());
        self.read_byte_limit = var
            .as_string()
            .parse::<u64>()
            .ok()
            .filter(|_| !var.is_missing())
            .unwrap_or(DEFAULT_READ_LIMIT);
    }
}
