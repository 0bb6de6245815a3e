//! Variable Registry: typed variable metadata and current values.
//!
//! Every other component reads values from here. Sections never own
//! variable state; they refer to variables by name.
//!
//! Writes go through [`VariableRegistry::set_value`], which runs type checks
//! and declared rules before committing. A rejected write leaves the previous
//! value in place.

pub mod errors;
pub mod registry;
pub mod types;
pub mod validation;

pub use errors::{RegistryError, ValidationError, ValidationReport};
pub use registry::{Predicate, RemovalAck, ValueChange, VariableRegistry};
pub use types::{SnapshotEntry, VarType, Variable, VariableSnapshot, VariableSpec};
pub use validation::{ValidationRule, check_type, validate_value};
