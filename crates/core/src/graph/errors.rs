//! Error types for the dependency tracker.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The edge would close a cycle. `path` runs from `dependent` through the
    /// existing edges back to `dependent`.
    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { dependent: String, dependency: String, path: Vec<String> },

    /// Node not present in the graph.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A cycle was found while sorting. Insertion checks should make this
    /// unreachable; seeing it means the graph was corrupted.
    #[error("cycle detected among: {}", .0.join(", "))]
    CycleDetected(Vec<String>),
}
