//! Error types for the variable registry and value validation.

use thiserror::Error;

/// Errors returned by [`super::VariableRegistry`] operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Variable not registered.
    #[error("variable not found: {0}")]
    NotFound(String),

    /// A variable with this name already exists.
    #[error("duplicate variable: {0}")]
    Duplicate(String),

    /// Variable name is not a valid identifier.
    #[error("invalid variable name '{0}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName(String),

    /// The declared default does not satisfy the variable's own type and rules.
    #[error("invalid default for '{name}': {report}")]
    InvalidDefault { name: String, report: ValidationReport },

    /// A write was rejected; the previous value is retained.
    #[error("rejected write to '{name}': {report}")]
    Validation { name: String, report: ValidationReport },

    /// Removal refused because dependents exist and the caller did not confirm.
    #[error("refusing to remove '{name}': {dependents} dependent(s) not confirmed")]
    RemovalNotConfirmed { name: String, dependents: usize },

    /// The removal impact passed in was computed for a different item.
    #[error("removal impact was computed for '{impact_for}', not '{name}'")]
    RemovalImpactMismatch { name: String, impact_for: String },
}

/// A single rule or type violation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required variable received no value.
    #[error("missing required value: {variable}")]
    MissingRequired { variable: String },

    /// Value has wrong type.
    #[error("invalid type for '{variable}': expected {expected}, got {actual}")]
    TypeMismatch { variable: String, expected: String, actual: String },

    /// Value breaks a declared rule.
    #[error("invalid value for '{variable}': {message}")]
    InvalidValue { variable: String, message: String },

    /// Enum constraint violated.
    #[error("'{variable}' must be one of {allowed:?}, got {value}")]
    EnumViolation { variable: String, value: String, allowed: Vec<String> },

    /// Custom predicate rejected the value.
    #[error("custom rule '{predicate}' failed for '{variable}': {message}")]
    CustomValidation { variable: String, predicate: String, message: String },

    /// A rule names a predicate nobody registered.
    #[error("unknown custom rule '{predicate}' on '{variable}'")]
    UnknownPredicate { variable: String, predicate: String },
}

/// Result of validating a value against a variable's type and rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Whether the value is acceptable.
    pub valid: bool,
    /// Validation errors (empty if valid).
    pub errors: Vec<ValidationError>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Create a successful validation report.
    pub fn success() -> Self {
        Self { valid: true, errors: vec![], warnings: vec![] }
    }

    /// Create a failed report with a single error.
    pub fn single_error(error: ValidationError) -> Self {
        Self { valid: false, errors: vec![error], warnings: vec![] }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
        self.valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        if !other.valid {
            self.valid = false;
        }
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "ok");
        }
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_propagates_failure() {
        let mut report = ValidationReport::success();
        report.merge(ValidationReport::single_error(ValidationError::MissingRequired {
            variable: "email".into(),
        }));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_display_joins_errors() {
        let mut report = ValidationReport::success();
        assert_eq!(report.to_string(), "ok");
        report.add_error(ValidationError::InvalidValue {
            variable: "age".into(),
            message: "too small".into(),
        });
        report.add_error(ValidationError::MissingRequired { variable: "name".into() });
        assert_eq!(
            report.to_string(),
            "invalid value for 'age': too small; missing required value: name"
        );
    }
}
