use thiserror::Error;

/// Result type alias for variable operations.
pub type EnvResult<T> = Result<T, EnvError>;

/// Code reported to the command layer when an operation succeeds.
pub const ENV_OK: i32 = 0;

/// User-triggerable failures of `set`/`remove`.
///
/// These are ordinary return values for the command layer to turn into
/// diagnostics; none of them is fatal. Caller contract violations (popping
/// past the global frame, mutating a missing variable) panic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// User-initiated write or removal of a read-only variable.
    #[error("cannot modify read-only variable '{0}'")]
    Perm(String),

    /// Contradictory or unresolvable scope flags.
    #[error("invalid scope for variable '{0}'")]
    Scope(String),

    /// Malformed variable name.
    #[error("invalid variable name '{0}'")]
    Invalid(String),
}

impl EnvError {
    /// Stable small integer consumed by the command layer (`ENV_OK` is 0).
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Perm(_) => 1,
            Self::Scope(_) => 2,
            Self::Invalid(_) => 3,
        }
    }
}
