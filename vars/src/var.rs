//! The variable entity and its array/sentinel encoding.

/// Character separating array elements inside a stored value (ASCII record
/// separator).
pub const ARRAY_SEP: char = '\u{1e}';

/// String form of [`ARRAY_SEP`].
pub const ARRAY_SEP_STR: &str = "\u{1e}";

/// Wire sentinel for "present but null": a variable that exists yet holds
/// zero elements. Legacy encoding; decoded to [`EnvVar`]'s internal tri-state
/// at the string boundary and never compared against elsewhere.
pub const ENV_NULL: &str = "\u{1d}";

/// Internal representation of a present variable's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VarValue {
    /// One zero-length element (the variable was set to `""`).
    Empty,
    /// Zero elements (the `ENV_NULL` sentinel on the wire).
    Null,
    /// One or more elements joined with [`ARRAY_SEP`].
    Joined(String),
}

impl VarValue {
    fn decode(s: &str) -> Self {
        if s.is_empty() {
            Self::Empty
        } else if s == ENV_NULL {
            Self::Null
        } else {
            Self::Joined(s.to_string())
        }
    }
}

/// A variable value: a string payload, an existence flag, and an export flag.
///
/// "Missing" is distinct from "empty": a missing variable does not exist, an
/// empty one exists with a zero-length (or null-sentinel) value. A missing
/// entity is immutable; reviving one requires constructing a fresh present
/// entity.
#[derive(Debug, Clone)]
pub struct EnvVar {
    val: VarValue,
    missing: bool,
    /// Whether the variable is placed into the export array for children.
    pub exported: bool,
}

impl EnvVar {
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self {
            val: VarValue::decode(value.as_ref()),
            missing: false,
            exported: false,
        }
    }

    /// Builds a present variable from discrete elements. An empty list is the
    /// null value (zero elements), not the empty string.
    #[must_use]
    pub fn from_list<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = elements
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(ARRAY_SEP_STR);
        if joined.is_empty() {
            // Ambiguous: could be zero elements or one empty element. A
            // genuinely empty single element arrives via `new("")` instead.
            Self {
                val: VarValue::Null,
                missing: false,
                exported: false,
            }
        } else {
            Self {
                val: VarValue::Joined(joined),
                missing: false,
                exported: false,
            }
        }
    }

    /// The entity representing "no such variable".
    #[must_use]
    pub fn missing_var() -> Self {
        Self {
            val: VarValue::Empty,
            missing: true,
            exported: false,
        }
    }

    #[must_use]
    pub fn exported(mut self, exported: bool) -> Self {
        self.exported = exported;
        self
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.missing
    }

    /// True for the empty string and for the null sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.val, VarValue::Empty | VarValue::Null)
    }

    /// The common guard for callers that only care whether a meaningful value
    /// exists.
    #[must_use]
    pub fn missing_or_empty(&self) -> bool {
        self.missing || self.is_empty()
    }

    /// Replaces the payload of a present variable.
    ///
    /// # Panics
    ///
    /// Panics if the entity is missing; a missing variable cannot be revived
    /// by mutation. That is a bug in the caller, not user input.
    pub fn set_val(&mut self, value: impl AsRef<str>) {
        assert!(
            !self.missing,
            "cannot assign a value to a missing variable"
        );
        self.val = VarValue::decode(value.as_ref());
    }

    /// The wire encoding of the payload (null sentinel included).
    #[must_use]
    pub fn as_string(&self) -> String {
        match &self.val {
            VarValue::Empty => String::new(),
            VarValue::Null => ENV_NULL.to_string(),
            VarValue::Joined(s) => s.clone(),
        }
    }

    /// The payload as discrete elements.
    ///
    /// Missing and null variables have zero elements; the empty string is one
    /// empty element.
    #[must_use]
    pub fn to_list(&self) -> Vec<String> {
        if self.missing {
            return Vec::new();
        }
        match &self.val {
            VarValue::Null => Vec::new(),
            VarValue::Empty => vec![String::new()],
            VarValue::Joined(s) => s.split(ARRAY_SEP).map(str::to_string).collect(),
        }
    }
}

/// Two entities are equal iff both are missing, or both are present with
/// equal values. The export flag does not participate.
impl PartialEq for EnvVar {
    fn eq(&self, other: &Self) -> bool {
        if self.missing || other.missing {
            return self.missing == other.missing;
        }
        self.val == other.val
    }
}

impl Eq for EnvVar {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_empty_truth_table() {
        assert!(EnvVar::missing_var().missing_or_empty());
        assert!(EnvVar::new("").missing_or_empty());
        assert!(EnvVar::new(ENV_NULL).missing_or_empty());
        assert!(!EnvVar::new("value").missing_or_empty());
    }

    #[test]
    fn equality_ignores_export_flag() {
        let plain = EnvVar::new("v");
        let exported = EnvVar::new("v").exported(true);
        assert_eq!(plain, exported);
    }

    #[test]
    fn missing_equals_missing_only() {
        assert_eq!(EnvVar::missing_var(), EnvVar::missing_var());
        assert_ne!(EnvVar::missing_var(), EnvVar::new(""));
        assert_ne!(EnvVar::new("a"), EnvVar::new("b"));
    }

    #[test]
    fn list_round_trip() {
        let var = EnvVar::from_list(["a", "b", "c"]);
        assert_eq!(var.to_list(), vec!["a", "b", "c"]);
        assert_eq!(var.as_string(), format!("a{ARRAY_SEP}b{ARRAY_SEP}c"));
    }

    #[test]
    fn empty_list_is_null() {
        let var = EnvVar::from_list(std::iter::empty::<&str>());
        assert!(var.is_empty());
        assert!(var.to_list().is_empty());
        assert_eq!(var.as_string(), ENV_NULL);
    }

    #[test]
    fn empty_string_is_one_empty_element() {
        let var = EnvVar::new("");
        assert_eq!(var.to_list(), vec![String::new()]);
        assert_eq!(var.as_string(), "");
    }

    #[test]
    fn null_sentinel_decodes_to_zero_elements() {
        let var = EnvVar::new(ENV_NULL);
        assert!(var.to_list().is_empty());
        assert_eq!(var.as_string(), ENV_NULL);
    }

    #[test]
    fn set_val_replaces_payload() {
        let mut var = EnvVar::new("old");
        var.set_val("new");
        assert_eq!(var.as_string(), "new");
    }

    #[test]
    #[should_panic(expected = "cannot assign a value to a missing variable")]
    fn set_val_on_missing_panics() {
        let mut var = EnvVar::missing_var();
        var.set_val("revived");
    }
}
