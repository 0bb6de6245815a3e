use serde::Serialize;
use thiserror::Error;

use super::formatters::FormatterError;
use super::provider::ProviderError;
use crate::graph::GraphError;
use crate::vars::RegistryError;

/// Failure of a single node. Sibling nodes keep evaluating; dependents are
/// marked blocked.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("unknown variable '@{0}'")]
    UnknownVariable(String),

    #[error("type error in '{op}': {message}")]
    Type { op: &'static str, message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error(transparent)]
    Formatter(#[from] FormatterError),

    #[error("logic node '{node}' failed: {source}")]
    Provider {
        node: String,
        #[source]
        source: ProviderError,
    },

    #[error("blocked by failed dependency '{failed}'")]
    Blocked { failed: String },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("unknown section '{0}'")]
    UnknownSection(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Category of a non-fatal evaluation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Recovered parse problem carried over from the template.
    Parse,
    /// `@name` that no section declares.
    UnknownVariable,
    /// Declared variable with no value and no default.
    Unset,
    /// `.field` / `[i]` access that found nothing.
    MissingPath,
    UnknownFormatter,
    /// Formatter rejected its input (preview only; strict evaluation fails).
    Formatter,
    /// Expression error (preview only; strict evaluation fails).
    Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
