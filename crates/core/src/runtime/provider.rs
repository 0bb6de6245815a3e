//! Boundary to the external logic provider: a resolved prompt goes in,
//! named output fields come out.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicRequest {
    /// Section id of the logic node.
    pub node_id: String,
    /// Prompt with every `@reference` already interpolated.
    pub prompt: String,
    /// Output fields the provider must fill.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogicOutput {
    pub fields: BTreeMap<String, Value>,
}

impl LogicOutput {
    /// Check every requested field is present.
    pub fn ensure_fields(&self, fields: &[String]) -> Result<(), ProviderError> {
        match fields.iter().find(|f| !self.fields.contains_key(*f)) {
            Some(missing) => Err(ProviderError::MissingField(missing.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider response is missing field '{0}'")]
    MissingField(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider call cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: Box<ProviderError> },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::MissingField(_) | Self::Timeout(_))
    }
}

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<LogicOutput, ProviderError>> + Send + 'a>>;

/// An asynchronous source of logic node values.
pub trait LogicProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete<'a>(&'a self, request: &'a LogicRequest) -> ProviderFuture<'a>;
}

/// Offline provider answering from canned outputs keyed by section id.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    fixtures: BTreeMap<String, BTreeMap<String, Value>>,
}

impl FixtureProvider {
    pub fn new(fixtures: BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        Self { fixtures }
    }

    pub fn with(mut self, section: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        self.fixtures.insert(section.into(), fields);
        self
    }
}

impl LogicProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixtures"
    }

    fn complete<'a>(&'a self, request: &'a LogicRequest) -> ProviderFuture<'a> {
        Box::pin(async move {
            let fields = self
                .fixtures
                .get(&request.node_id)
                .ok_or_else(|| ProviderError::Request(format!("no fixture for '{}'", request.node_id)))?;
            Ok(LogicOutput { fields: fields.clone() })
        })
    }
}
