use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Result of [`super::DependencyTracker::validate_graph`].
///
/// Everything here is a warning: the graph is still acyclic and sortable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphReport {
    /// Registered nodes with no edges in either direction.
    pub orphaned: BTreeSet<String>,
    /// Nodes that appear as a dependency but were never registered.
    pub missing: BTreeSet<String>,
    /// Registered nodes that transitively depend on a missing node.
    pub unreachable: BTreeSet<String>,
}

impl GraphReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.missing.is_empty() && self.unreachable.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.orphaned.iter().map(|n| format!("orphaned node: {n}")));
        out.extend(self.missing.iter().map(|n| format!("missing dependency: {n}")));
        out.extend(self.unreachable.iter().map(|n| format!("unreachable node: {n}")));
        out
    }
}

impl fmt::Display for GraphReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "graph ok");
        }
        write!(f, "{}", self.warnings().join("\n"))
    }
}
