//! The variable registry store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{RegistryError, ValidationReport};
use super::types::{SnapshotEntry, Variable, VariableSnapshot, VariableSpec};
use super::validation::validate_value;
use crate::sync::lock;

/// Named custom validation predicate.
pub type Predicate = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A committed value change.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub name: String,
    pub old: Option<Value>,
    pub new: Value,
    pub version: u64,
}

/// Caller's acknowledgement of what removing a variable breaks.
///
/// Built from the dependency tracker's removal impact; the registry only
/// checks that it matches and was confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalAck {
    pub variable: String,
    pub dependents: BTreeSet<String>,
    pub confirmed: bool,
}

/// Typed store of variable metadata and values.
///
/// One mutex guards the map; it is held only while reading or swapping
/// entries, never across an evaluation.
#[derive(Default)]
pub struct VariableRegistry {
    vars: Mutex<HashMap<String, Variable>>,
    predicates: Mutex<HashMap<String, Predicate>>,
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRegistry").field("len", &self.len()).finish()
    }
}

impl VariableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom predicate usable from `custom` rules.
    pub fn register_predicate<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        lock(&self.predicates).insert(name.into(), Arc::new(predicate));
    }

    /// Register a new variable.
    pub fn register(&self, spec: VariableSpec) -> Result<Uuid, RegistryError> {
        validate_name(&spec.name)?;
        let var = Variable::from_spec(spec);
        self.check_default(&var)?;

        let mut vars = lock(&self.vars);
        if vars.contains_key(&var.name) {
            return Err(RegistryError::Duplicate(var.name));
        }
        let id = var.id;
        debug!(variable = %var.name, var_type = %var.var_type, "registered variable");
        vars.insert(var.name.clone(), var);
        Ok(id)
    }

    /// Update a variable's declaration, keeping its identity.
    ///
    /// The current value survives if it still validates under the new
    /// declaration; otherwise it is dropped. Unknown names are registered.
    pub fn redeclare(&self, spec: VariableSpec) -> Result<Uuid, RegistryError> {
        validate_name(&spec.name)?;
        let mut fresh = Variable::from_spec(spec);
        self.check_default(&fresh)?;

        let predicates = lock(&self.predicates).clone();
        let mut vars = lock(&self.vars);
        if let Some(existing) = vars.get(&fresh.name) {
            fresh.id = existing.id;
            fresh.created_at = existing.created_at;
            fresh.version = existing.version;
            if let Some(value) = &existing.value {
                if validate_value(&fresh, value, &predicates).valid {
                    fresh.value = Some(value.clone());
                } else {
                    warn!(variable = %fresh.name, "value no longer valid after redeclare, dropping");
                    fresh.version += 1;
                }
            }
        }
        let id = fresh.id;
        vars.insert(fresh.name.clone(), fresh);
        Ok(id)
    }

    /// Remove a variable.
    ///
    /// Refuses unless `ack` names this variable and, when it lists
    /// dependents, is confirmed.
    pub fn unregister(&self, name: &str, ack: &RemovalAck) -> Result<Variable, RegistryError> {
        if ack.variable != name {
            return Err(RegistryError::RemovalImpactMismatch {
                name: name.to_string(),
                impact_for: ack.variable.clone(),
            });
        }
        if !ack.dependents.is_empty() && !ack.confirmed {
            return Err(RegistryError::RemovalNotConfirmed {
                name: name.to_string(),
                dependents: ack.dependents.len(),
            });
        }

        let removed = lock(&self.vars)
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        debug!(variable = %name, "unregistered variable");
        Ok(removed)
    }

    /// Get a copy of a variable.
    pub fn get(&self, name: &str) -> Option<Variable> {
        lock(&self.vars).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.vars).contains_key(name)
    }

    /// Effective value: current value, else the declared default.
    pub fn get_value(&self, name: &str) -> Result<Option<Value>, RegistryError> {
        let vars = lock(&self.vars);
        let var = vars.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(var.effective_value().cloned())
    }

    /// Validate a candidate value without writing it.
    pub fn validate_value(&self, name: &str, value: &Value) -> Result<ValidationReport, RegistryError> {
        let var = self.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let predicates = lock(&self.predicates).clone();
        Ok(validate_value(&var, value, &predicates))
    }

    /// Validate and commit a value. On rejection the previous value stays.
    ///
    /// Writing the value already stored is not a change and does not bump
    /// the version.
    pub fn set_value(&self, name: &str, value: Value) -> Result<Option<ValueChange>, RegistryError> {
        let mut changes = self.commit_batch(vec![(name.to_string(), value)])?;
        Ok(changes.pop())
    }

    /// Apply several writes all-or-nothing.
    ///
    /// Every write is validated before any is applied. Returns the writes that
    /// actually changed a value.
    pub fn commit_batch(&self, writes: Vec<(String, Value)>) -> Result<Vec<ValueChange>, RegistryError> {
        let predicates = lock(&self.predicates).clone();
        let mut vars = lock(&self.vars);

        for (name, value) in &writes {
            let var = vars.get(name).ok_or_else(|| RegistryError::NotFound(name.clone()))?;
            let report = validate_value(var, value, &predicates);
            if !report.valid {
                debug!(variable = %name, %report, "rejected write");
                return Err(RegistryError::Validation { name: name.clone(), report });
            }
        }

        let now = Utc::now();
        let mut changes = Vec::new();
        for (name, value) in writes {
            let Some(var) = vars.get_mut(&name) else { continue };
            let new_value = if value.is_null() { None } else { Some(value.clone()) };
            if var.value == new_value {
                continue;
            }
            let old = std::mem::replace(&mut var.value, new_value);
            var.version += 1;
            var.updated_at = now;
            debug!(variable = %name, version = var.version, "committed value");
            changes.push(ValueChange { name, old, new: value, version: var.version });
        }
        Ok(changes)
    }

    /// Immutable copy of every variable's effective value and version.
    pub fn snapshot(&self) -> VariableSnapshot {
        let vars = lock(&self.vars);
        let entries: BTreeMap<String, SnapshotEntry> = vars
            .values()
            .map(|v| {
                (
                    v.name.clone(),
                    SnapshotEntry {
                        value: v.effective_value().cloned(),
                        version: v.version,
                        var_type: v.var_type,
                    },
                )
            })
            .collect();
        VariableSnapshot::new(entries)
    }

    /// Current version of a variable.
    pub fn version(&self, name: &str) -> Option<u64> {
        lock(&self.vars).get(name).map(|v| v.version)
    }

    /// All variables, sorted by name.
    pub fn list(&self) -> Vec<Variable> {
        let mut all: Vec<Variable> = lock(&self.vars).values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Variables in one namespace, sorted by name.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Variable> {
        self.list().into_iter().filter(|v| v.namespace == namespace).collect()
    }

    /// Variables produced by a section.
    pub fn produced_by(&self, section: &str) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.vars)
            .values()
            .filter(|v| v.source_section.as_deref() == Some(section))
            .map(|v| v.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.vars).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every variable (explicit rebuilds only).
    pub fn clear(&self) {
        lock(&self.vars).clear();
    }

    /// Put back a previously read variable as-is, undoing a redeclare.
    pub(crate) fn restore(&self, variable: Variable) {
        lock(&self.vars).insert(variable.name.clone(), variable);
    }

    fn check_default(&self, var: &Variable) -> Result<(), RegistryError> {
        if let Some(default) = &var.default_value {
            let predicates = lock(&self.predicates).clone();
            let report = validate_value(var, default, &predicates);
            if !report.valid {
                return Err(RegistryError::InvalidDefault { name: var.name.clone(), report });
            }
        }
        Ok(())
    }
}

/// Variable names must be usable as `@name` references.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if is_identifier(name) { Ok(()) } else { Err(RegistryError::InvalidName(name.to_string())) }
}
