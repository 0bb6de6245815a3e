//! Variable model types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::validation::ValidationRule;

/// Declared type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// `YYYY-MM-DD` or RFC 3339.
    Date,
    Email,
    Phone,
    Url,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Date => "date",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Url => "url",
        }
    }

    /// Whether values of this type are stored as JSON strings.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Date | Self::Email | Self::Phone | Self::Url)
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "str" | "text" => Ok(Self::String),
            "number" | "num" | "int" | "integer" | "float" => Ok(Self::Number),
            "boolean" | "bool" => Ok(Self::Boolean),
            "array" | "list" => Ok(Self::Array),
            "object" | "map" => Ok(Self::Object),
            "date" | "datetime" => Ok(Self::Date),
            "email" => Ok(Self::Email),
            "phone" | "tel" => Ok(Self::Phone),
            "url" | "link" => Ok(Self::Url),
            _ => Err(format!("unknown variable type: {}", s)),
        }
    }
}

/// Declaration used to register a variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VarType,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Section that produces this variable.
    #[serde(default)]
    pub source_section: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

impl VariableSpec {
    /// A plain variable of the given type with no rules.
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self { name: name.into(), var_type, ..Default::default() }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_source(mut self, section: impl Into<String>) -> Self {
        self.source_section = Some(section.into());
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A registered variable. Owned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    pub namespace: String,
    pub source_section: Option<String>,
    pub value: Option<Value>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub validation_rules: Vec<ValidationRule>,
    /// Bumped on every committed write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Variable {
    pub const DEFAULT_NAMESPACE: &'static str = "campaign";

    pub fn from_spec(spec: VariableSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            var_type: spec.var_type,
            namespace: spec.namespace.unwrap_or_else(|| Self::DEFAULT_NAMESPACE.to_string()),
            source_section: spec.source_section,
            value: None,
            default_value: spec.default,
            required: spec.required,
            validation_rules: spec.rules,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current value, falling back to the declared default.
    pub fn effective_value(&self) -> Option<&Value> {
        self.value.as_ref().or(self.default_value.as_ref())
    }
}

/// One variable as seen by an evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// Effective value (value, else default). `None` means unset.
    pub value: Option<Value>,
    pub version: u64,
    pub var_type: VarType,
}

/// Immutable copy of the registry taken at the start of an evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSnapshot {
    entries: BTreeMap<String, SnapshotEntry>,
}

impl VariableSnapshot {
    pub fn new(entries: BTreeMap<String, SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).and_then(|e| e.value.as_ref())
    }

    pub fn version(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.version)
    }

    /// Overlay a staged value (used for writes not yet committed).
    pub fn stage(&mut self, name: &str, value: Value) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.value = Some(value);
            entry.version += 1;
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_var_type_from_str() {
        assert_eq!("string".parse::<VarType>().unwrap(), VarType::String);
        assert_eq!("integer".parse::<VarType>().unwrap(), VarType::Number);
        assert_eq!("bool".parse::<VarType>().unwrap(), VarType::Boolean);
        assert_eq!("list".parse::<VarType>().unwrap(), VarType::Array);
        assert_eq!("tel".parse::<VarType>().unwrap(), VarType::Phone);
        assert!("money".parse::<VarType>().is_err());
    }

    #[test]
    fn test_var_type_display() {
        assert_eq!(VarType::Email.to_string(), "email");
        assert_eq!(VarType::Object.to_string(), "object");
    }

    #[test]
    fn test_effective_value_falls_back_to_default() {
        let mut var = Variable::from_spec(
            VariableSpec::new("plan", VarType::String).with_default(json!("basic")),
        );
        assert_eq!(var.effective_value(), Some(&json!("basic")));

        var.value = Some(json!("pro"));
        assert_eq!(var.effective_value(), Some(&json!("pro")));
    }

    #[test]
    fn test_spec_deserialize_yaml() {
        let yaml = r#"
name: age
type: number
required: true
rules:
  - rule: min
    value: 18
"#;
        let spec: VariableSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.var_type, VarType::Number);
        assert!(spec.required);
        assert_eq!(spec.rules, vec![ValidationRule::Min(18.0)]);
    }

    #[test]
    fn test_snapshot_stage_bumps_version() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "a".to_string(),
            SnapshotEntry { value: None, version: 3, var_type: VarType::Number },
        );
        let mut snap = VariableSnapshot::new(entries);
        snap.stage("a", json!(1));
        assert_eq!(snap.value("a"), Some(&json!(1)));
        assert_eq!(snap.version("a"), Some(4));

        // Unknown names are ignored
        snap.stage("zzz", json!(1));
        assert!(!snap.contains("zzz"));
    }
}
