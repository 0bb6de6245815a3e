//! Value validation against a variable's declared type and rules.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{ValidationError, ValidationReport};
use super::registry::Predicate;
use super::types::{VarType, Variable};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("valid regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid regex"));

/// A declared constraint on a variable's value.
///
/// In YAML: `{ rule: min_length, value: 3 }`, `{ rule: custom, value: is_even }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum ValidationRule {
    /// Minimum string length in characters.
    MinLength(usize),
    /// Maximum string length in characters.
    MaxLength(usize),
    /// Regex the string must match.
    Pattern(String),
    /// Minimum numeric value.
    Min(f64),
    /// Maximum numeric value.
    Max(f64),
    /// Allowed values.
    OneOf(Vec<Value>),
    /// Minimum number of array items.
    MinItems(usize),
    /// Maximum number of array items.
    MaxItems(usize),
    /// Named predicate registered on the registry.
    Custom(String),
}

/// Check a value against a variable type.
///
/// Returns the actual type name on mismatch.
pub fn check_type(var_type: VarType, value: &Value) -> Result<(), String> {
    let ok = match (var_type, value) {
        (VarType::String, Value::String(_)) => true,
        (VarType::Number, Value::Number(_)) => true,
        (VarType::Boolean, Value::Bool(_)) => true,
        (VarType::Array, Value::Array(_)) => true,
        (VarType::Object, Value::Object(_)) => true,
        (VarType::Date, Value::String(s)) => is_valid_date(s),
        (VarType::Email, Value::String(s)) => EMAIL_RE.is_match(s.trim()),
        (VarType::Phone, Value::String(s)) => is_valid_phone(s),
        (VarType::Url, Value::String(s)) => URL_RE.is_match(s.trim()),
        _ => false,
    };

    if ok { Ok(()) } else { Err(describe(value)) }
}

/// Validate a candidate value for a variable.
///
/// `null` clears an optional variable and is rejected for required ones.
pub fn validate_value(
    var: &Variable,
    value: &Value,
    predicates: &HashMap<String, Predicate>,
) -> ValidationReport {
    let name = var.name.as_str();

    if value.is_null() {
        if var.required {
            return ValidationReport::single_error(ValidationError::MissingRequired {
                variable: name.to_string(),
            });
        }
        return ValidationReport::success();
    }

    if let Err(actual) = check_type(var.var_type, value) {
        return ValidationReport::single_error(ValidationError::TypeMismatch {
            variable: name.to_string(),
            expected: var.var_type.to_string(),
            actual,
        });
    }

    let mut report = ValidationReport::success();
    for rule in &var.validation_rules {
        apply_rule(name, rule, value, predicates, &mut report);
    }
    report
}

fn apply_rule(
    name: &str,
    rule: &ValidationRule,
    value: &Value,
    predicates: &HashMap<String, Predicate>,
    report: &mut ValidationReport,
) {
    let invalid = |message: String| ValidationError::InvalidValue {
        variable: name.to_string(),
        message,
    };

    match (rule, value) {
        (ValidationRule::MinLength(min), Value::String(s)) => {
            let len = s.chars().count();
            if len < *min {
                report.add_error(invalid(format!(
                    "string length {} is less than minimum {}",
                    len, min
                )));
            }
        }
        (ValidationRule::MaxLength(max), Value::String(s)) => {
            let len = s.chars().count();
            if len > *max {
                report.add_error(invalid(format!(
                    "string length {} is greater than maximum {}",
                    len, max
                )));
            }
        }
        (ValidationRule::Pattern(pattern), Value::String(s)) => match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(s) {
                    report.add_error(invalid(format!(
                        "value '{}' does not match pattern '{}'",
                        s, pattern
                    )));
                }
            }
            Err(e) => report.add_error(invalid(format!("invalid pattern '{}': {}", pattern, e))),
        },
        (ValidationRule::Min(min), Value::Number(n)) => {
            if let Some(f) = n.as_f64()
                && f < *min
            {
                report.add_error(invalid(format!("value {} is less than minimum {}", f, min)));
            }
        }
        (ValidationRule::Max(max), Value::Number(n)) => {
            if let Some(f) = n.as_f64()
                && f > *max
            {
                report.add_error(invalid(format!("value {} is greater than maximum {}", f, max)));
            }
        }
        (ValidationRule::OneOf(allowed), v) => {
            if !allowed.contains(v) {
                report.add_error(ValidationError::EnumViolation {
                    variable: name.to_string(),
                    value: v.to_string(),
                    allowed: allowed.iter().map(ToString::to_string).collect(),
                });
            }
        }
        (ValidationRule::MinItems(min), Value::Array(items)) => {
            if items.len() < *min {
                report.add_error(invalid(format!(
                    "list has {} items, minimum is {}",
                    items.len(),
                    min
                )));
            }
        }
        (ValidationRule::MaxItems(max), Value::Array(items)) => {
            if items.len() > *max {
                report.add_error(invalid(format!(
                    "list has {} items, maximum is {}",
                    items.len(),
                    max
                )));
            }
        }
        (ValidationRule::Custom(predicate), v) => match predicates.get(predicate) {
            Some(check) => {
                if let Err(message) = check(v) {
                    report.add_error(ValidationError::CustomValidation {
                        variable: name.to_string(),
                        predicate: predicate.clone(),
                        message,
                    });
                }
            }
            None => report.add_error(ValidationError::UnknownPredicate {
                variable: name.to_string(),
                predicate: predicate.clone(),
            }),
        },
        (rule, v) => report.add_warning(format!(
            "rule {:?} does not apply to {} value of '{}'",
            rule,
            describe(v),
            name
        )),
    }
}

/// Check if a string is a valid date (YYYY-MM-DD or RFC 3339).
fn is_valid_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
}

/// Phone numbers: optional leading `+`, 7-15 digits, common separators allowed.
fn is_valid_phone(s: &str) -> bool {
    let compact: String =
        s.chars().filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')')).collect();
    PHONE_RE.is_match(&compact)
}

/// Human-readable type name for a JSON value.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}
