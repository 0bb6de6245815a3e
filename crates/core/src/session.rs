//! One campaign-editing session.
//!
//! [`CampaignSession`] owns the registry, the dependency tracker, the cache,
//! the runtime engine and the update bus for a single campaign. Nothing is
//! global: build one per editor session or per test.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::PerformanceCache;
use crate::config::EngineConfig;
use crate::graph::{DependencyTracker, GraphError, GraphReport, NodeRef, RemovalImpact, section_node, var_node};
use crate::interpolation::ParseCache;
use crate::runtime::{
    EvalError, EvalMode, EvaluationResult, FixtureProvider, LogicProvider, NodeOutcome, PassReport, RetryPolicy,
    RuntimeEngine, evaluate_with,
};
use crate::sections::{CampaignDocument, DocumentError, Section, SectionError, SectionSet};
use crate::updates::{EngineMetrics, MetricsSnapshot, UpdateBus, UpdateEvent};
use crate::vars::{RegistryError, RemovalAck, ValueChange, VariableRegistry};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Section(#[from] SectionError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("variable '{variable}' is already produced by section '{section}'")]
    OutputConflict { variable: String, section: String },

    #[error("removing '{target}' breaks {} dependent node(s); confirm to proceed", dependents.len())]
    RemovalNotConfirmed { target: String, dependents: BTreeSet<String> },
}

/// A recovered parse problem in one template field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateIssue {
    pub section: String,
    pub field: String,
    pub message: String,
}

/// Result of [`CampaignSession::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    pub graph: GraphReport,
    /// A cycle found at validation time. Insertion-time checks should make
    /// this impossible.
    pub cycle: Option<Vec<String>>,
    pub parse_errors: Vec<TemplateIssue>,
    /// Declared variables nothing reads.
    pub unused_variables: BTreeSet<String>,
    pub publishable: bool,
}

impl CampaignReport {
    pub fn warnings(&self) -> Vec<String> {
        let mut out = self.graph.warnings();
        out.extend(self.unused_variables.iter().map(|v| format!("unused variable: {v}")));
        out
    }

    pub fn errors(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(path) = &self.cycle {
            out.push(format!("dependency cycle: {}", path.join(" -> ")));
        }
        out.extend(self.parse_errors.iter().map(|e| format!("{}.{}: {}", e.section, e.field, e.message)));
        out
    }
}

pub struct CampaignSession {
    config: EngineConfig,
    registry: Arc<VariableRegistry>,
    tracker: Arc<DependencyTracker>,
    cache: Arc<PerformanceCache>,
    templates: Arc<ParseCache>,
    sections: Arc<RwLock<SectionSet>>,
    engine: RuntimeEngine,
    bus: UpdateBus,
}

impl std::fmt::Debug for CampaignSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignSession")
            .field("sections", &self.read_sections().len())
            .field("variables", &self.registry.len())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl CampaignSession {
    pub fn new(config: EngineConfig, provider: Arc<dyn LogicProvider>) -> Self {
        let registry = Arc::new(VariableRegistry::new());
        let tracker = Arc::new(DependencyTracker::new());
        let cache = Arc::new(PerformanceCache::new(&config.cache));
        let templates = Arc::new(ParseCache::new(config.cache.memo_capacity));
        let sections = Arc::new(RwLock::new(SectionSet::new()));

        let engine = RuntimeEngine::new(registry.clone(), tracker.clone(), cache.clone(), provider)
            .with_retry(RetryPolicy::from(&config.provider))
            .with_templates(templates.clone())
            .with_metrics(Arc::new(EngineMetrics::new()));
        let bus = UpdateBus::new(engine.clone(), sections.clone(), &config.updates);

        Self { config, registry, tracker, cache, templates, sections, engine, bus }
    }

    /// Session over a campaign document, answering logic sections from the
    /// document's fixtures.
    pub fn from_document(config: EngineConfig, doc: &CampaignDocument) -> Result<Self, SessionError> {
        let session = Self::new(config, Arc::new(FixtureProvider::new(doc.fixtures.clone())));
        session.load(doc)?;
        Ok(session)
    }

    /// Add a document's sections and initial values.
    pub fn load(&self, doc: &CampaignDocument) -> Result<(), SessionError> {
        for section in &doc.sections {
            self.add_section(section.clone(), None)?;
        }
        let writes: Vec<(String, Value)> = doc.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for change in self.registry.commit_batch(writes)? {
            self.cache.invalidate_variable(&change.name, &self.tracker);
        }
        info!(sections = doc.sections.len(), values = doc.values.len(), "campaign loaded");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<DependencyTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<PerformanceCache> {
        &self.cache
    }

    pub fn engine(&self) -> &RuntimeEngine {
        &self.engine
    }

    /// Copy of the current sections, in display order.
    pub fn sections(&self) -> SectionSet {
        self.read_sections().clone()
    }

    pub fn section(&self, id: &str) -> Option<Section> {
        self.read_sections().get(id).cloned()
    }

    /// Add a section, registering its outputs and dependency edges.
    ///
    /// All-or-nothing: a cycle or an invalid output leaves the session as
    /// it was.
    pub fn add_section(&self, section: Section, index: Option<usize>) -> Result<(), SessionError> {
        section.validate()?;
        if self.read_sections().contains(&section.id) {
            return Err(SectionError::DuplicateSection(section.id).into());
        }
        self.check_output_owners(&section)?;

        let mut registered = Vec::new();
        for output in section.outputs() {
            if let Err(err) = self.registry.register(output.to_spec(&section.id)) {
                self.forget_variables(&registered);
                return Err(err.into());
            }
            registered.push(output.name.clone());
        }
        if let Err(err) = self.wire(&section) {
            self.forget_variables(&registered);
            return Err(err.into());
        }

        for output in section.outputs() {
            self.cache.invalidate_variable(&output.name, &self.tracker);
        }
        debug!(section = %section.id, kind = section.type_name(), "section added");
        self.write_sections().insert(section, index)?;
        Ok(())
    }

    /// Replace a section's definition under the same id.
    ///
    /// Refuses to drop an output something else still reads; remove those
    /// dependents first.
    pub fn edit_section(&self, section: Section) -> Result<Section, SessionError> {
        section.validate()?;
        let old = self.section(&section.id).ok_or_else(|| SectionError::NotFound(section.id.clone()))?;
        self.check_output_owners(&section)?;

        let new_outputs: BTreeSet<String> = section.output_names().into_iter().collect();
        let dropped: Vec<String> = old.output_names().into_iter().filter(|o| !new_outputs.contains(o)).collect();
        for name in &dropped {
            let impact = self.variable_impact(name, &section.id);
            if !impact.is_safe() {
                return Err(SessionError::RemovalNotConfirmed { target: var_node(name), dependents: impact.dependents });
            }
        }

        // graph first: a rejected edit must leave the registry untouched
        let node = section_node(&section.id);
        let old_deps = self.tracker.dependencies(&node);
        let new_nodes: Vec<String> =
            section.output_names().iter().map(|n| var_node(n)).filter(|n| !self.tracker.contains(n)).collect();
        self.wire(&section)?;

        let mut added = Vec::new();
        let mut previous = Vec::new();
        for output in section.outputs() {
            let result = match self.registry.get(&output.name) {
                Some(existing) => {
                    previous.push(existing);
                    self.registry.redeclare(output.to_spec(&section.id))
                }
                None => {
                    added.push(output.name.clone());
                    self.registry.register(output.to_spec(&section.id))
                }
            };
            if let Err(err) = result {
                self.forget_variables(&added);
                for variable in previous {
                    self.registry.restore(variable);
                }
                for n in &new_nodes {
                    self.tracker.remove_node(n);
                }
                // restoring edges that were already acyclic cannot fail
                let _ = self.tracker.replace_dependencies(&node, &old_deps);
                return Err(err.into());
            }
        }

        let mut affected = self.tracker.transitive_dependents(&node);
        affected.insert(node);
        self.cache.invalidate(&affected);
        for name in &dropped {
            self.drop_variable(name, true)?;
        }
        debug!(section = %section.id, "section edited");
        Ok(self.write_sections().replace(section)?)
    }

    /// Change a section's display position. The graph is unaffected.
    pub fn move_section(&self, id: &str, index: usize) -> Result<(), SessionError> {
        Ok(self.write_sections().move_to(id, index)?)
    }

    /// What would break if section `id` were removed: every node that
    /// transitively depends on it, apart from its own outputs.
    pub fn removal_impact(&self, id: &str) -> RemovalImpact {
        let node = section_node(id);
        let own: BTreeSet<String> = self
            .section(id)
            .map(|s| s.output_names().iter().map(|n| var_node(n)).collect())
            .unwrap_or_default();
        let mut impact = self.tracker.removal_impact(&node);
        impact.dependents.retain(|d| !own.contains(d));
        impact
    }

    /// Remove a section and the variables it produces.
    ///
    /// When anything depends on it, `confirm` must be set; the dependents are
    /// left referencing variables that no longer exist and show up as
    /// missing in [`CampaignSession::validate`].
    pub fn remove_section(&self, id: &str, confirm: bool) -> Result<Section, SessionError> {
        let section = self.section(id).ok_or_else(|| SectionError::NotFound(id.to_string()))?;
        let impact = self.removal_impact(id);
        if !impact.is_safe() && !confirm {
            return Err(SessionError::RemovalNotConfirmed { target: impact.target, dependents: impact.dependents });
        }

        for name in section.output_names() {
            self.drop_variable(&name, confirm)?;
        }
        let node = section_node(id);
        self.cache.invalidate(&BTreeSet::from([node.clone()]));
        self.tracker.remove_node(&node);

        let removed = self.write_sections().remove(id).ok_or_else(|| SectionError::NotFound(id.to_string()))?;
        info!(section = %id, dependents = impact.dependents.len(), "section removed");
        Ok(removed)
    }

    /// Commit a value and schedule the cascade over its dependents.
    pub fn set_value(&self, name: &str, value: Value) -> Result<Option<ValueChange>, SessionError> {
        let change = self.registry.set_value(name, value)?;
        if let Some(change) = &change {
            self.cache.invalidate_variable(&change.name, &self.tracker);
            self.bus.notify(vec![change.name.clone()]);
        }
        Ok(change)
    }

    /// Commit several values at once; they share one cascade.
    pub fn apply_changes(&self, writes: Vec<(String, Value)>) -> Result<Vec<ValueChange>, SessionError> {
        let changes = self.registry.commit_batch(writes)?;
        for change in &changes {
            self.cache.invalidate_variable(&change.name, &self.tracker);
        }
        self.bus.notify(changes.iter().map(|c| c.name.clone()).collect());
        Ok(changes)
    }

    /// Render a section for an editor preview. Never fails on template
    /// problems; they come back as diagnostics.
    pub fn render_preview(&self, id: &str) -> Result<NodeOutcome, SessionError> {
        let section = self.section(id).ok_or_else(|| SectionError::NotFound(id.to_string()))?;
        Ok(self.engine.render_section(&section, &self.registry.snapshot(), EvalMode::Preview))
    }

    /// Preview arbitrary text against current values.
    pub fn preview_text(&self, text: &str) -> EvaluationResult {
        let parsed = self.templates.get_or_parse(text);
        evaluate_with(&parsed.ast, &self.registry.snapshot(), EvalMode::Preview)
    }

    /// Evaluate a section and everything it depends on, then commit.
    ///
    /// Values the pass changed are handed to the update bus so sections
    /// outside this subgraph catch up.
    pub async fn evaluate_section(&self, id: &str) -> Result<PassReport, SessionError> {
        if !self.read_sections().contains(id) {
            return Err(SectionError::NotFound(id.to_string()).into());
        }
        let order = self.tracker.topological_order_for(&[section_node(id)])?;
        Ok(self.execute(order).await)
    }

    /// Evaluate every section in dependency order, then commit.
    pub async fn evaluate_all(&self) -> Result<PassReport, SessionError> {
        let order = self.tracker.topological_order()?;
        Ok(self.execute(order).await)
    }

    async fn execute(&self, order: Vec<String>) -> PassReport {
        let sections = self.sections();
        let mut ctx = self.engine.context();
        let report = self.engine.execute(&sections, order, &mut ctx).await;
        self.bus.notify(report.committed.iter().map(|c| c.name.clone()).collect());
        report
    }

    /// Check the campaign before publishing.
    pub fn validate(&self) -> CampaignReport {
        let graph = self.tracker.validate_graph();
        let cycle = self.tracker.find_cycle_path();

        let mut parse_errors = Vec::new();
        let mut unused_variables = BTreeSet::new();
        for section in self.read_sections().iter() {
            for (field, text) in section.templates() {
                let parsed = self.templates.get_or_parse(text);
                parse_errors.extend(parsed.diagnostics.iter().map(|d| TemplateIssue {
                    section: section.id.clone(),
                    field: field.to_string(),
                    message: d.to_string(),
                }));
            }
            for name in section.output_names() {
                if self.tracker.dependents(&var_node(&name)).is_empty() {
                    unused_variables.insert(name);
                }
            }
        }

        let has_warnings = !graph.is_clean() || !unused_variables.is_empty();
        let publishable = cycle.is_none()
            && parse_errors.is_empty()
            && !(self.config.publish.block_on_warnings && has_warnings);
        CampaignReport { graph, cycle, parse_errors, unused_variables, publishable }
    }

    /// Throw away the graph and every cache tier and rebuild them from the
    /// current sections. Variable values are kept.
    pub fn rebuild(&self) -> Result<(), SessionError> {
        let sections = self.sections();
        self.cache.clear();
        self.templates.clear();
        self.tracker.clear();
        for section in sections.iter() {
            self.wire(section)?;
        }
        info!(sections = sections.len(), nodes = self.tracker.node_count(), "graph rebuilt");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.bus.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics().snapshot(self.cache.stats())
    }

    /// Current values of every variable, by name.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|v| v.effective_value().cloned().map(|value| (v.name, value)))
            .collect()
    }

    /// Register a section's nodes and swap in its edges: one edge to every
    /// variable its templates read, and one from each output back to it.
    fn wire(&self, section: &Section) -> Result<(), GraphError> {
        let node = section_node(&section.id);
        let mut reads = BTreeSet::new();
        for (_, text) in section.templates() {
            reads.extend(self.templates.get_or_parse(text).dependencies.iter().map(|d| var_node(d)));
        }

        let previous = self.tracker.dependencies(&node);
        self.tracker.replace_dependencies(&node, &reads)?;
        let outputs: Vec<(String, String)> =
            section.output_names().iter().map(|name| (var_node(name), node.clone())).collect();
        if let Err(err) = self.tracker.add_dependencies(outputs.clone()) {
            let _ = self.tracker.replace_dependencies(&node, &previous);
            return Err(err);
        }

        self.tracker.add_node(&node);
        for (output, _) in &outputs {
            self.tracker.add_node(output);
        }
        Ok(())
    }

    /// Dependents of a variable other than `owner`, its producer.
    fn variable_impact(&self, name: &str, owner: &str) -> RemovalImpact {
        let mut impact = self.tracker.removal_impact(&var_node(name));
        impact.dependents.remove(&section_node(owner));
        impact
    }

    /// Unregister a variable and take its node out of the graph, re-wiring
    /// the sections that read it so the reference shows up as missing.
    fn drop_variable(&self, name: &str, confirm: bool) -> Result<(), SessionError> {
        let node = var_node(name);
        let owner = self.registry.get(name).and_then(|v| v.source_section).unwrap_or_default();
        let impact = self.variable_impact(name, &owner);
        let ack = RemovalAck { variable: name.to_string(), dependents: impact.dependents, confirmed: confirm };
        self.registry.unregister(name, &ack)?;

        self.cache.invalidate_variable(name, &self.tracker);
        let readers: Vec<String> = self
            .tracker
            .dependents(&node)
            .into_iter()
            .filter(|n| NodeRef::parse(n).as_section().is_some_and(|id| id != owner))
            .collect();
        self.tracker.remove_node(&node);

        let sections = self.sections();
        for reader in readers {
            if let Some(section) = NodeRef::parse(&reader).as_section().and_then(|id| sections.get(id)) {
                self.wire(section)?;
            }
        }
        Ok(())
    }

    fn forget_variables(&self, names: &[String]) {
        for name in names {
            let ack = RemovalAck { variable: name.clone(), dependents: BTreeSet::new(), confirmed: true };
            let _ = self.registry.unregister(name, &ack);
        }
    }

    fn check_output_owners(&self, section: &Section) -> Result<(), SessionError> {
        for name in section.output_names() {
            if let Some(var) = self.registry.get(&name)
                && let Some(owner) = var.source_section
                && owner != section.id
            {
                return Err(SessionError::OutputConflict { variable: name, section: owner });
            }
        }
        Ok(())
    }

    fn read_sections(&self) -> RwLockReadGuard<'_, SectionSet> {
        self.sections.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_sections(&self) -> RwLockWriteGuard<'_, SectionSet> {
        self.sections.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
