//! Typed section model.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::vars::registry::is_identifier;
use crate::vars::{ValidationRule, VarType, VariableSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionError {
    #[error("section id must not be empty")]
    EmptyId,

    #[error("section '{section}': invalid output name '{name}'")]
    InvalidOutputName { section: String, name: String },

    #[error("logic section '{0}' declares no outputs")]
    NoOutputs(String),

    #[error("section '{section}' declares output '{name}' twice")]
    DuplicateOutput { section: String, name: String },

    #[error("duplicate section id: {0}")]
    DuplicateSection(String),

    #[error("section not found: {0}")]
    NotFound(String),
}

/// A variable a section produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VarType,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

impl OutputDecl {
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self { name: name.into(), var_type, namespace: None, default: None, required: false, rules: Vec::new() }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn to_spec(&self, section_id: &str) -> VariableSpec {
        VariableSpec {
            name: self.name.clone(),
            var_type: self.var_type,
            namespace: self.namespace.clone(),
            source_section: Some(section_id.to_string()),
            default: self.default.clone(),
            required: self.required,
            rules: self.rules.clone(),
        }
    }
}

/// Per-type settings. Each variant carries only what that type supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionKind {
    /// Asks the respondent for one value.
    Question { prompt: String, output: OutputDecl },
    /// Static or interpolated text.
    Content { body: String },
    /// Value produced by the external logic provider.
    Logic { prompt: String, outputs: Vec<OutputDecl> },
    /// Form collecting several values.
    Capture {
        #[serde(default)]
        heading: Option<String>,
        fields: Vec<OutputDecl>,
    },
    /// Final display.
    Output { template: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub kind: SectionKind,
}

impl Section {
    /// Build and validate a section.
    pub fn new(id: impl Into<String>, kind: SectionKind) -> Result<Self, SectionError> {
        let section = Self { id: id.into(), title: None, kind };
        section.validate()?;
        Ok(section)
    }

    pub fn validate(&self) -> Result<(), SectionError> {
        if self.id.trim().is_empty() {
            return Err(SectionError::EmptyId);
        }
        if let SectionKind::Logic { outputs, .. } = &self.kind
            && outputs.is_empty()
        {
            return Err(SectionError::NoOutputs(self.id.clone()));
        }
        let mut seen = BTreeSet::new();
        for output in self.outputs() {
            if !is_identifier(&output.name) {
                return Err(SectionError::InvalidOutputName { section: self.id.clone(), name: output.name.clone() });
            }
            if !seen.insert(output.name.as_str()) {
                return Err(SectionError::DuplicateOutput { section: self.id.clone(), name: output.name.clone() });
            }
        }
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            SectionKind::Question { .. } => "question",
            SectionKind::Content { .. } => "content",
            SectionKind::Logic { .. } => "logic",
            SectionKind::Capture { .. } => "capture",
            SectionKind::Output { .. } => "output",
        }
    }

    pub fn is_logic(&self) -> bool {
        matches!(self.kind, SectionKind::Logic { .. })
    }

    /// Variables this section produces.
    pub fn outputs(&self) -> &[OutputDecl] {
        match &self.kind {
            SectionKind::Question { output, .. } => std::slice::from_ref(output),
            SectionKind::Logic { outputs, .. } => outputs,
            SectionKind::Capture { fields, .. } => fields,
            SectionKind::Content { .. } | SectionKind::Output { .. } => &[],
        }
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs().iter().map(|o| o.name.clone()).collect()
    }

    /// Interpolated text fields, by field name.
    pub fn templates(&self) -> Vec<(&'static str, &str)> {
        match &self.kind {
            SectionKind::Question { prompt, .. } | SectionKind::Logic { prompt, .. } => vec![("prompt", prompt.as_str())],
            SectionKind::Content { body } => vec![("body", body.as_str())],
            SectionKind::Capture { heading, .. } => {
                heading.as_deref().map(|h| vec![("heading", h)]).unwrap_or_default()
            }
            SectionKind::Output { template } => vec![("template", template.as_str())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_needs_outputs() {
        let err = Section::new("score", SectionKind::Logic { prompt: "x".into(), outputs: vec![] }).unwrap_err();
        assert_eq!(err, SectionError::NoOutputs("score".into()));
    }

    #[test]
    fn test_rejects_bad_and_duplicate_outputs() {
        let kind = SectionKind::Capture {
            heading: None,
            fields: vec![OutputDecl::new("email", VarType::Email), OutputDecl::new("email", VarType::Email)],
        };
        assert!(matches!(Section::new("form", kind), Err(SectionError::DuplicateOutput { .. })));

        let kind = SectionKind::Question { prompt: "?".into(), output: OutputDecl::new("first name", VarType::String) };
        assert!(matches!(Section::new("q", kind), Err(SectionError::InvalidOutputName { .. })));
        assert_eq!(Section::new(" ", SectionKind::Content { body: String::new() }), Err(SectionError::EmptyId));
    }

    #[test]
    fn test_yaml_shape() {
        let yaml = r#"
id: ask_name
type: question
prompt: "What's your name?"
output:
  name: name
  type: string
  required: true
  rules:
    - { rule: min_length, value: 2 }
"#;
        let section: Section = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(section.type_name(), "question");
        assert_eq!(section.output_names(), vec!["name"]);
        assert_eq!(section.outputs()[0].rules, vec![ValidationRule::MinLength(2)]);
        assert_eq!(section.templates(), vec![("prompt", "What's your name?")]);
    }

    #[test]
    fn test_to_spec_records_source() {
        let spec = OutputDecl::new("score", VarType::Number).to_spec("rate");
        assert_eq!(spec.source_section.as_deref(), Some("rate"));
        assert_eq!(spec.var_type, VarType::Number);
    }
}
