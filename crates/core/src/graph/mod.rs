//! Dependency tracking between sections and variables.

mod errors;
mod node;
mod report;
mod tracker;

pub use errors::GraphError;
pub use node::{NodeRef, section_node, var_node};
pub use report::GraphReport;
pub use tracker::{DependencyTracker, RemovalImpact};
