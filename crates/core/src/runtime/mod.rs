//! Execution context and runtime engine.

mod context;
mod engine;
mod errors;
mod evaluator;
pub mod formatters;
mod inflight;
mod provider;
mod retry;

pub use context::{ExecutionContext, ExecutionRecord, NodeStatus, PassMetrics};
pub use engine::{NodeOutcome, PassReport, RuntimeEngine};
pub use errors::{Diagnostic, DiagnosticKind, EvalError};
pub use evaluator::{EvalMode, EvaluationResult, evaluate, evaluate_cached, evaluate_with};
pub use formatters::FormatterError;
pub use provider::{FixtureProvider, LogicOutput, LogicProvider, LogicRequest, ProviderError, ProviderFuture};
pub use retry::RetryPolicy;
