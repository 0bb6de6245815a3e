//! Dependency-ordered evaluation of sections.
//!
//! A pass walks the given order wave by wave. Non-logic sections render
//! inline; logic sections in the same wave call the provider concurrently.
//! A failed node never stops its siblings, but everything downstream of it
//! is marked blocked. Provider outputs are staged on the context and reach
//! the registry only through [`RuntimeEngine::commit`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{ExecutionContext, NodeStatus};
use super::errors::{Diagnostic, EvalError};
use super::evaluator::{EvalMode, evaluate_cached};
use super::formatters::to_text;
use super::inflight::{Claim, InFlight, follow};
use super::provider::{LogicOutput, LogicProvider, LogicRequest, ProviderError};
use super::retry::RetryPolicy;
use crate::cache::PerformanceCache;
use crate::graph::{DependencyTracker, NodeRef, section_node, var_node};
use crate::hasher::content_hash_str;
use crate::interpolation::ParseCache;
use crate::sections::{Section, SectionKind, SectionSet};
use crate::sync::lock;
use crate::updates::EngineMetrics;
use crate::vars::{RegistryError, ValueChange, VariableRegistry, VariableSnapshot};

const DEFAULT_TEMPLATE_CAPACITY: usize = 512;

/// Result of one node in a pass.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node: String,
    pub status: NodeStatus,
    /// Rendered text per template field (`prompt`, `body`, ...).
    pub rendered: BTreeMap<String, String>,
    /// Values a logic node produced. Staged, not yet committed.
    pub outputs: BTreeMap<String, Value>,
    pub error: Option<EvalError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl NodeOutcome {
    fn new(node: &str, status: NodeStatus) -> Self {
        Self {
            node: node.to_string(),
            status,
            rendered: BTreeMap::new(),
            outputs: BTreeMap::new(),
            error: None,
            diagnostics: Vec::new(),
        }
    }

    fn failed(node: &str, status: NodeStatus, error: EvalError) -> Self {
        Self { error: Some(error), ..Self::new(node, status) }
    }

    fn fail(&mut self, error: EvalError) {
        self.status = NodeStatus::Failed;
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, NodeStatus::Evaluated | NodeStatus::Cached)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Order the pass was asked to follow.
    pub order: Vec<String>,
    /// Outcome per graph node that did something (sections, blocked variables).
    pub outcomes: BTreeMap<String, NodeOutcome>,
    pub cancelled: bool,
    /// Changes written by the commit that followed the pass, if any.
    pub committed: Vec<ValueChange>,
    pub commit_error: Option<EvalError>,
}

impl PassReport {
    pub fn section(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(&section_node(id))
    }

    /// Failed or blocked nodes.
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.values().filter(|o| matches!(o.status, NodeStatus::Failed | NodeStatus::Blocked))
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.commit_error.is_none() && self.failures().next().is_none()
    }
}

struct LogicCall {
    node: String,
    request: LogicRequest,
    rendered: BTreeMap<String, String>,
    diagnostics: Vec<Diagnostic>,
    tags: BTreeSet<String>,
}

struct LogicDone {
    call: LogicCall,
    result: Result<LogicOutput, ProviderError>,
    cached: bool,
    provider_calls: u32,
    retries: u32,
    elapsed: Duration,
}

/// Evaluates sections against the registry, the graph and the cache.
///
/// Cloning is cheap; every store is shared.
#[derive(Clone)]
pub struct RuntimeEngine {
    registry: Arc<VariableRegistry>,
    tracker: Arc<DependencyTracker>,
    cache: Arc<PerformanceCache>,
    templates: Arc<ParseCache>,
    provider: Arc<dyn LogicProvider>,
    retry: RetryPolicy,
    inflight: Arc<InFlight>,
    metrics: Arc<EngineMetrics>,
    commit_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for RuntimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEngine")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RuntimeEngine {
    pub fn new(
        registry: Arc<VariableRegistry>,
        tracker: Arc<DependencyTracker>,
        cache: Arc<PerformanceCache>,
        provider: Arc<dyn LogicProvider>,
    ) -> Self {
        Self {
            registry,
            tracker,
            cache,
            templates: Arc::new(ParseCache::new(DEFAULT_TEMPLATE_CAPACITY)),
            provider,
            retry: RetryPolicy::default(),
            inflight: Arc::new(InFlight::default()),
            metrics: Arc::new(EngineMetrics::new()),
            commit_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_templates(mut self, templates: Arc<ParseCache>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
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

    pub fn templates(&self) -> &Arc<ParseCache> {
        &self.templates
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Fresh context over the registry's current state.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.registry.snapshot())
    }

    /// Run a pass over `order` and commit its staged writes unless it was
    /// cancelled.
    pub async fn execute(&self, sections: &SectionSet, order: Vec<String>, ctx: &mut ExecutionContext) -> PassReport {
        let mut report = self.run(sections, order, ctx).await;
        if report.cancelled {
            return report;
        }
        match self.commit(ctx) {
            Ok(changes) => report.committed = changes,
            Err(EvalError::Cancelled) => report.cancelled = true,
            Err(err) => {
                warn!(error = %err, "commit rejected");
                report.commit_error = Some(err);
            }
        }
        report
    }

    /// Evaluate every node of `order` without committing anything.
    ///
    /// `order` must already be topological; nodes are grouped into waves
    /// and each wave starts only after the previous one settled.
    #[tracing::instrument(level = "debug", skip_all, fields(pass = %ctx.id(), nodes = order.len()))]
    pub async fn run(&self, sections: &SectionSet, order: Vec<String>, ctx: &mut ExecutionContext) -> PassReport {
        self.metrics.pass();
        let waves = self.tracker.evaluation_waves(&order);
        let mut report = PassReport { order, ..PassReport::default() };
        // failed or blocked node -> the failure that caused it
        let mut failed: BTreeMap<String, String> = BTreeMap::new();

        for wave in waves {
            if ctx.is_cancelled() {
                break;
            }
            let mut calls: JoinSet<LogicDone> = JoinSet::new();
            let mut pending: BTreeSet<String> = BTreeSet::new();

            for node in wave {
                let started = Instant::now();
                if let Some(root) = self.blocked_by(&node, &failed) {
                    debug!(%node, failed = %root, "blocked");
                    let outcome = NodeOutcome::failed(&node, NodeStatus::Blocked, EvalError::Blocked { failed: root });
                    settle(outcome, started.elapsed(), ctx, &mut report, &mut failed);
                    continue;
                }
                let Some(id) = NodeRef::parse(&node).as_section() else {
                    continue;
                };
                let Some(section) = sections.get(id) else {
                    let outcome = NodeOutcome::failed(&node, NodeStatus::Failed, EvalError::UnknownSection(id.to_string()));
                    settle(outcome, started.elapsed(), ctx, &mut report, &mut failed);
                    continue;
                };

                match self.prepare_call(section, ctx.snapshot()) {
                    Some(Ok(call)) => {
                        let engine = self.clone();
                        let cancel = ctx.cancellation().child_token();
                        pending.insert(call.node.clone());
                        calls.spawn(async move { engine.call_provider(call, cancel).await });
                    }
                    Some(Err(outcome)) => settle(outcome, started.elapsed(), ctx, &mut report, &mut failed),
                    None => {
                        let outcome = self.render_section(section, ctx.snapshot(), EvalMode::Strict);
                        settle(outcome, started.elapsed(), ctx, &mut report, &mut failed);
                    }
                }
            }

            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok(done) => {
                        pending.remove(&done.call.node);
                        let elapsed = done.elapsed;
                        let outcome = self.accept_logic(done, ctx);
                        settle(outcome, elapsed, ctx, &mut report, &mut failed);
                    }
                    Err(err) => warn!(error = %err, "logic task aborted"),
                }
            }
            for node in pending {
                let error = EvalError::Provider { node: node.clone(), source: ProviderError::Request("task aborted".into()) };
                settle(NodeOutcome::failed(&node, NodeStatus::Failed, error), Duration::ZERO, ctx, &mut report, &mut failed);
            }
        }

        report.cancelled = ctx.is_cancelled();
        if report.cancelled {
            debug!(pass = %ctx.id(), "pass cancelled");
        }
        report
    }

    /// Write the context's staged values to the registry and evict every
    /// cache entry derived from them. Refuses once the context is cancelled.
    pub fn commit(&self, ctx: &mut ExecutionContext) -> Result<Vec<ValueChange>, EvalError> {
        let _gate = lock(&self.commit_gate);
        if ctx.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let changes = self.registry.commit_batch(ctx.take_staged())?;
        for change in &changes {
            self.cache.invalidate_variable(&change.name, &self.tracker);
        }
        Ok(changes)
    }

    /// Cancel `token` in step with commits, so a pass is either committed
    /// whole or cancelled before it writes anything.
    pub fn supersede(&self, token: &CancellationToken) {
        let _gate = lock(&self.commit_gate);
        token.cancel();
    }

    /// Render every template field of a section.
    pub fn render_section(&self, section: &Section, snapshot: &VariableSnapshot, mode: EvalMode) -> NodeOutcome {
        let node = section_node(&section.id);
        let tags = BTreeSet::from([node.clone()]);
        let mut outcome = NodeOutcome::new(&node, NodeStatus::Cached);

        let templates = section.templates();
        if templates.is_empty() {
            outcome.status = NodeStatus::Evaluated;
        }
        for (field, text) in templates {
            let parsed = self.templates.get_or_parse(text);
            let (result, hit) = evaluate_cached(&parsed, snapshot, mode, &self.cache, &tags);
            outcome.diagnostics.extend(result.diagnostics);
            match result.value {
                Ok(value) => {
                    if !hit {
                        outcome.status = NodeStatus::Evaluated;
                    }
                    outcome.rendered.insert(field.to_string(), to_text(&value));
                }
                Err(err) => {
                    outcome.fail(err);
                    return outcome;
                }
            }
        }
        outcome
    }

    fn blocked_by(&self, node: &str, failed: &BTreeMap<String, String>) -> Option<String> {
        self.tracker.dependencies(node).iter().find_map(|dep| failed.get(dep).cloned())
    }

    /// `None` for non-logic sections.
    fn prepare_call(&self, section: &Section, snapshot: &VariableSnapshot) -> Option<Result<LogicCall, NodeOutcome>> {
        let SectionKind::Logic { outputs, .. } = &section.kind else {
            return None;
        };
        let rendered = self.render_section(section, snapshot, EvalMode::Strict);
        if rendered.status == NodeStatus::Failed {
            return Some(Err(rendered));
        }

        let prompt = rendered.rendered.get("prompt").cloned().unwrap_or_default();
        let parsed = self.templates.get_or_parse(section.templates().first().map_or("", |(_, t)| *t));
        let mut tags: BTreeSet<String> = parsed.dependencies.iter().map(|d| var_node(d)).collect();
        tags.insert(rendered.node.clone());

        Some(Ok(LogicCall {
            node: rendered.node,
            request: LogicRequest {
                node_id: section.id.clone(),
                prompt,
                fields: outputs.iter().map(|o| o.name.clone()).collect(),
            },
            rendered: rendered.rendered,
            diagnostics: rendered.diagnostics,
            tags,
        }))
    }

    /// Resolve one logic call: response cache, then an in-flight call for
    /// the same prompt, then the provider itself.
    async fn call_provider(&self, call: LogicCall, cancel: CancellationToken) -> LogicDone {
        let started = Instant::now();
        let mut provider_calls = 0;
        let mut retries = 0;

        let key = format!("{}#{}", call.node, content_hash_str(&call.request.prompt));
        let (result, cached) = loop {
            if let Some(fields) = self.cache.external_get(&call.request.prompt, &call.request.fields) {
                break (Ok(LogicOutput { fields }), true);
            }
            match self.inflight.claim(&key) {
                Claim::Follower(rx) => {
                    debug!(node = %call.node, "attaching to in-flight provider call");
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        r = follow(rx) => r,
                    };
                    // the leader was cancelled but this caller was not: take over
                    if matches!(result, Err(ProviderError::Cancelled)) && !cancel.is_cancelled() {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    break (result, false);
                }
                Claim::Leader(guard) => {
                    provider_calls = 1;
                    self.metrics.provider_call();
                    let metrics = &self.metrics;
                    let result = self
                        .retry
                        .run(self.provider.as_ref(), &call.request, &cancel, |_, _| {
                            retries += 1;
                            metrics.provider_retry();
                        })
                        .await;
                    if let Ok(output) = &result {
                        self.cache.external_put(
                            &call.request.prompt,
                            &call.request.fields,
                            output.fields.clone(),
                            call.tags.clone(),
                        );
                    }
                    guard.complete(result.clone());
                    break (result, false);
                }
            }
        };

        LogicDone { call, result, cached, provider_calls, retries, elapsed: started.elapsed() }
    }

    /// Validate a provider answer against the declared outputs and stage it.
    fn accept_logic(&self, done: LogicDone, ctx: &mut ExecutionContext) -> NodeOutcome {
        let LogicDone { call, result, cached, provider_calls, retries, .. } = done;
        let metrics = ctx.metrics_mut();
        metrics.provider_calls += provider_calls;
        metrics.provider_retries += retries;

        let status = if cached { NodeStatus::Cached } else { NodeStatus::Evaluated };
        let mut outcome = NodeOutcome {
            rendered: call.rendered,
            diagnostics: call.diagnostics,
            ..NodeOutcome::new(&call.node, status)
        };

        let output = match result {
            Ok(output) => output,
            Err(ProviderError::Cancelled) => {
                outcome.status = NodeStatus::Cancelled;
                outcome.error = Some(EvalError::Cancelled);
                return outcome;
            }
            Err(source) => {
                warn!(node = %call.node, error = %source, "logic node failed");
                outcome.fail(EvalError::Provider { node: call.request.node_id, source });
                return outcome;
            }
        };

        for field in &call.request.fields {
            let value = output.fields.get(field).cloned().unwrap_or(Value::Null);
            match self.registry.validate_value(field, &value) {
                Ok(report) if report.valid => {
                    outcome.outputs.insert(field.clone(), value);
                }
                Ok(report) => {
                    outcome.outputs.clear();
                    outcome.fail(RegistryError::Validation { name: field.clone(), report }.into());
                    return outcome;
                }
                Err(err) => {
                    outcome.outputs.clear();
                    outcome.fail(err.into());
                    return outcome;
                }
            }
        }
        for (name, value) in &outcome.outputs {
            ctx.stage(name, value.clone());
        }
        outcome
    }
}

fn settle(
    outcome: NodeOutcome,
    elapsed: Duration,
    ctx: &mut ExecutionContext,
    report: &mut PassReport,
    failed: &mut BTreeMap<String, String>,
) {
    ctx.record(&outcome.node, outcome.status, elapsed, outcome.error.as_ref().map(ToString::to_string));
    match (&outcome.status, &outcome.error) {
        (NodeStatus::Blocked, Some(EvalError::Blocked { failed: root })) => {
            failed.insert(outcome.node.clone(), root.clone());
        }
        (NodeStatus::Failed | NodeStatus::Blocked | NodeStatus::Cancelled, _) => {
            failed.insert(outcome.node.clone(), outcome.node.clone());
        }
        _ => {}
    }
    report.outcomes.insert(outcome.node.clone(), outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::runtime::provider::{FixtureProvider, ProviderFuture};
    use crate::sections::OutputDecl;
    use crate::vars::{VarType, VariableSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Down;

    impl LogicProvider for Down {
        fn name(&self) -> &str {
            "down"
        }

        fn complete<'a>(&'a self, _request: &'a LogicRequest) -> ProviderFuture<'a> {
            Box::pin(async { Err(ProviderError::Request("503".into())) })
        }
    }

    struct Counting {
        calls: AtomicU32,
        inner: FixtureProvider,
    }

    impl LogicProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn complete<'a>(&'a self, request: &'a LogicRequest) -> ProviderFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.complete(request)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            timeout: Duration::from_secs(5),
        }
    }

    /// greet (Hi @name) and grader (logic -> score) both read `name`;
    /// verdict reads `score`.
    fn campaign(provider: Arc<dyn LogicProvider>) -> (RuntimeEngine, SectionSet) {
        let registry = Arc::new(VariableRegistry::new());
        registry.register(VariableSpec::new("name", VarType::String)).unwrap();
        registry.set_value("name", json!("Ada")).unwrap();
        registry.register(VariableSpec::new("score", VarType::Number).with_source("grader")).unwrap();

        let mut sections = SectionSet::new();
        let greet = Section::new("greet", SectionKind::Content { body: "Hi @name".into() }).unwrap();
        let grader = Section::new(
            "grader",
            SectionKind::Logic {
                prompt: "Rate @name".into(),
                outputs: vec![OutputDecl::new("score", VarType::Number)],
            },
        )
        .unwrap();
        let verdict = Section::new("verdict", SectionKind::Content { body: "Score: @score".into() }).unwrap();
        for section in [greet, grader, verdict] {
            sections.insert(section, None).unwrap();
        }

        let tracker = Arc::new(DependencyTracker::new());
        tracker
            .add_dependencies([
                ("section:greet", "var:name"),
                ("section:grader", "var:name"),
                ("var:score", "section:grader"),
                ("section:verdict", "var:score"),
            ])
            .unwrap();

        let cache = Arc::new(PerformanceCache::new(&CacheConfig::default()));
        let engine = RuntimeEngine::new(registry, tracker, cache, provider).with_retry(fast_retry());
        (engine, sections)
    }

    fn fixtures(score: i64) -> FixtureProvider {
        FixtureProvider::default().with("grader", BTreeMap::from([("score".to_string(), json!(score))]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_logic_blocks_dependents_only() {
        let (engine, sections) = campaign(Arc::new(Down));
        let order = engine.tracker().topological_order().unwrap();
        let mut ctx = engine.context();

        let report = engine.execute(&sections, order, &mut ctx).await;

        let greet = report.section("greet").unwrap();
        assert!(greet.is_success());
        assert_eq!(greet.rendered["body"], "Hi Ada");

        let grader = report.section("grader").unwrap();
        assert_eq!(grader.status, NodeStatus::Failed);
        assert!(matches!(
            &grader.error,
            Some(EvalError::Provider { source: ProviderError::Exhausted { attempts: 3, .. }, .. })
        ));

        let verdict = report.section("verdict").unwrap();
        assert_eq!(verdict.status, NodeStatus::Blocked);
        assert!(matches!(&verdict.error, Some(EvalError::Blocked { failed }) if failed == "section:grader"));
        assert_eq!(ctx.metrics().provider_retries, 2);
        assert!(report.committed.is_empty());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_logic_outputs_flow_to_dependents_and_commit() {
        let (engine, sections) = campaign(Arc::new(fixtures(7)));
        let order = engine.tracker().topological_order().unwrap();
        let mut ctx = engine.context();

        let report = engine.execute(&sections, order, &mut ctx).await;

        assert!(report.is_success());
        assert_eq!(report.section("grader").unwrap().rendered["prompt"], "Rate Ada");
        assert_eq!(report.section("verdict").unwrap().rendered["body"], "Score: 7");
        assert_eq!(report.committed.len(), 1);
        assert_eq!(engine.registry().get_value("score").unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn test_invalid_provider_output_is_not_staged() {
        let provider = FixtureProvider::default().with("grader", BTreeMap::from([("score".to_string(), json!("high"))]));
        let (engine, sections) = campaign(Arc::new(provider));
        let order = engine.tracker().topological_order_for(&["section:grader"]).unwrap();
        let mut ctx = engine.context();

        let report = engine.execute(&sections, order, &mut ctx).await;

        let grader = report.section("grader").unwrap();
        assert!(matches!(&grader.error, Some(EvalError::Registry(RegistryError::Validation { name, .. })) if name == "score"));
        assert!(report.committed.is_empty());
        assert_eq!(engine.registry().get_value("score").unwrap(), None);
    }

    #[tokio::test]
    async fn test_repeat_prompt_is_served_from_response_cache() {
        let provider = Arc::new(Counting { calls: AtomicU32::new(0), inner: fixtures(4) });
        let (engine, sections) = campaign(provider.clone());
        let order = engine.tracker().topological_order_for(&["section:grader"]).unwrap();

        let first = engine.execute(&sections, order.clone(), &mut engine.context()).await;
        let second = engine.execute(&sections, order, &mut engine.context()).await;

        assert_eq!(first.section("grader").unwrap().status, NodeStatus::Evaluated);
        assert_eq!(second.section("grader").unwrap().status, NodeStatus::Cached);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_commits_nothing() {
        let (engine, sections) = campaign(Arc::new(fixtures(9)));
        let order = engine.tracker().topological_order().unwrap();
        let token = CancellationToken::new();
        let mut ctx = engine.context().with_cancellation(token.clone());
        engine.supersede(&token);

        let report = engine.execute(&sections, order, &mut ctx).await;

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(engine.registry().get_value("score").unwrap(), None);
    }

    #[test]
    fn test_render_section_reports_unknown_reference() {
        let (engine, _) = campaign(Arc::new(FixtureProvider::default()));
        let section = Section::new("draft", SectionKind::Content { body: "Hi @nobody".into() }).unwrap();

        let strict = engine.render_section(&section, &engine.registry().snapshot(), EvalMode::Strict);
        assert_eq!(strict.status, NodeStatus::Failed);

        let preview = engine.render_section(&section, &engine.registry().snapshot(), EvalMode::Preview);
        assert_eq!(preview.rendered["body"], "Hi @nobody");
        assert_eq!(preview.diagnostics.len(), 1);
    }
}
