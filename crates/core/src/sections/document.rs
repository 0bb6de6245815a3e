//! Campaign documents: the YAML form the CLI and tests load sections from.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::types::{Section, SectionError};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read campaign file {0}: {1}")]
    ReadError(String, #[source] std::io::Error),

    #[error("failed to parse campaign YAML in {0}: {1}")]
    ParseError(String, #[source] serde_yaml::Error),

    #[error(transparent)]
    Section(#[from] SectionError),
}

/// ```yaml
/// name: Spring promo
/// sections:
///   - id: ask_name
///     type: question
///     prompt: "Your name?"
///     output: { name: name, type: string }
/// values:
///   name: Ada
/// fixtures:
///   score_lead: { score: 8 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub sections: Vec<Section>,
    /// Initial variable values.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Canned provider outputs per logic section, for offline evaluation.
    #[serde(default)]
    pub fixtures: BTreeMap<String, BTreeMap<String, Value>>,
}

impl CampaignDocument {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let s = fs::read_to_string(path).map_err(|e| DocumentError::ReadError(path.display().to_string(), e))?;
        Self::from_yaml_str(&s, path)
    }

    /// Parse and validate document text; `origin` is only used in errors.
    pub fn from_yaml_str(s: &str, origin: &Path) -> Result<Self, DocumentError> {
        let doc: CampaignDocument =
            serde_yaml::from_str(s).map_err(|e| DocumentError::ParseError(origin.display().to_string(), e))?;

        let mut ids = BTreeSet::new();
        for section in &doc.sections {
            section.validate()?;
            if !ids.insert(section.id.as_str()) {
                return Err(SectionError::DuplicateSection(section.id.clone()).into());
            }
        }
        Ok(doc)
    }
}
