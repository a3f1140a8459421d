use bitflags::bitflags;

bitflags! {
    /// Request modifiers for `get`/`set`/`remove`.
    ///
    /// These direct which scope an operation targets and whether it originates
    /// from direct user action; they are not variable state. The empty set is
    /// the default mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvMode: u32 {
        /// Target the current local scope.
        const LOCAL     = 1;
        /// Mark the variable exported to child processes.
        const EXPORT    = 2;
        /// Target the process-global scope.
        const GLOBAL    = 4;
        /// The request comes from direct user action (`set` builtin);
        /// read-only enforcement applies.
        const USER      = 8;
        /// Clear the variable's export flag.
        const UNEXPORT  = 16;
        /// Target the cross-process universal scope.
        const UNIVERSAL = 32;
    }
}

impl EnvMode {
    pub(crate) const SCOPES: Self = Self::LOCAL.union(Self::GLOBAL).union(Self::UNIVERSAL);

    /// True when more than one scope is requested, or when export and
    /// unexport are requested together.
    pub(crate) fn is_conflicting(self) -> bool {
        let scopes = self.intersection(Self::SCOPES);
        if scopes.bits().count_ones() > 1 {
            return true;
        }
        self.contains(Self::EXPORT.union(Self::UNEXPORT))
    }

    /// The export flag this request carries, if any.
    pub(crate) fn export_request(self) -> Option<bool> {
        if self.contains(Self::EXPORT) {
            Some(true)
        } else if self.contains(Self::UNEXPORT) {
            Some(false)
        } else {
            None
        }
    }

    /// True when no particular scope was requested.
    pub(crate) fn is_scopeless(self) -> bool {
        !self.intersects(Self::SCOPES)
    }
}
