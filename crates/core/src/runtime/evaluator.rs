//! Evaluation of parsed templates against a variable snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::context::ExecutionContext;
use super::errors::{Diagnostic, DiagnosticKind, EvalError};
use super::formatters::{self, to_text};
use crate::cache::{MemoKey, PerformanceCache};
use crate::graph::var_node;
use crate::interpolation::{Ast, Expr, Formatter, Node, Operator, ParsedTemplate, PathSegment, VarRef, to_source};
use crate::vars::VariableSnapshot;

/// How strictly problems are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Full evaluation: unknown variables, expression and formatter errors
    /// fail the node.
    Strict,
    /// Editor preview: every problem becomes a diagnostic and rendering
    /// continues.
    Preview,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub value: Result<Value, EvalError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl EvaluationResult {
    /// Rendered text, or `None` on failure.
    pub fn text(&self) -> Option<String> {
        self.value.as_ref().ok().map(to_text)
    }
}

/// Evaluate `ast` strictly against the context's snapshot.
pub fn evaluate(ast: &Ast, ctx: &ExecutionContext) -> EvaluationResult {
    evaluate_with(ast, ctx.snapshot(), EvalMode::Strict)
}

pub fn evaluate_with(ast: &Ast, snapshot: &VariableSnapshot, mode: EvalMode) -> EvaluationResult {
    let mut evaluator = Evaluator { snapshot, mode, diagnostics: Vec::new() };
    let value = evaluator.evaluate_ast(ast);
    EvaluationResult { value, diagnostics: evaluator.diagnostics }
}

/// Evaluate a parsed template, going through the intern and memo tiers.
///
/// `tags` are extra graph nodes (usually the owning section) whose change
/// must evict the memoized result, on top of the referenced variables.
pub fn evaluate_cached(
    template: &ParsedTemplate,
    snapshot: &VariableSnapshot,
    mode: EvalMode,
    cache: &PerformanceCache,
    tags: &BTreeSet<String>,
) -> (EvaluationResult, bool) {
    let mut diagnostics: Vec<Diagnostic> = template
        .diagnostics
        .iter()
        .map(|d| Diagnostic::new(DiagnosticKind::Parse, d.to_string()))
        .collect();

    if template.ast.is_static() {
        let text = cache.intern(&literal_text(&template.ast));
        let value = Ok(Value::String(text.to_string()));
        return (EvaluationResult { value, diagnostics }, true);
    }

    let key = MemoKey::new(template.hash, &template.dependencies, snapshot);
    if let Some(value) = cache.memo_get(&key, snapshot) {
        return (EvaluationResult { value: Ok(value), diagnostics }, true);
    }

    let result = evaluate_with(&template.ast, snapshot, mode);
    if let Ok(value) = &result.value
        && result.diagnostics.is_empty()
    {
        let versions: BTreeMap<String, u64> = template
            .dependencies
            .iter()
            .filter_map(|name| snapshot.version(name).map(|v| (name.clone(), v)))
            .collect();
        let mut entry_tags: BTreeSet<String> = template.dependencies.iter().map(|d| var_node(d)).collect();
        entry_tags.extend(tags.iter().cloned());
        cache.memo_put(key, value.clone(), versions, entry_tags);
    }
    diagnostics.extend(result.diagnostics);
    (EvaluationResult { value: result.value, diagnostics }, false)
}

fn literal_text(ast: &Ast) -> String {
    ast.nodes
        .iter()
        .filter_map(|n| match n {
            Node::Literal { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

struct Evaluator<'a> {
    snapshot: &'a VariableSnapshot,
    mode: EvalMode,
    diagnostics: Vec<Diagnostic>,
}

impl Evaluator<'_> {
    fn diag(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(kind, message));
    }

    /// A lone reference or expression block keeps its typed value; anything
    /// else renders to text.
    fn evaluate_ast(&mut self, ast: &Ast) -> Result<Value, EvalError> {
        match ast.nodes.as_slice() {
            [node @ (Node::VariableRef(_) | Node::Expression { .. })] => match self.node_value(node) {
                Err(err) if self.mode == EvalMode::Preview => {
                    self.diag(DiagnosticKind::Expression, err.to_string());
                    Ok(Value::Null)
                }
                other => other,
            },
            nodes => {
                let mut out = String::new();
                self.render_nodes(nodes, &mut out)?;
                Ok(Value::String(out))
            }
        }
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), EvalError> {
        for node in nodes {
            if let Node::Literal { text } = node {
                out.push_str(text);
                continue;
            }
            match self.node_value(node) {
                Ok(value) => out.push_str(&to_text(&value)),
                Err(err) if self.mode == EvalMode::Preview => {
                    self.diag(DiagnosticKind::Expression, err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn node_value(&mut self, node: &Node) -> Result<Value, EvalError> {
        match node {
            Node::Literal { text } => Ok(Value::String(text.clone())),
            Node::VariableRef(r) => self.reference(r),
            Node::Conditional { cond, then_branch, else_branch } => {
                let branch = if truthy(&self.expr(cond)?) { then_branch } else { else_branch };
                let mut out = String::new();
                self.render_nodes(branch, &mut out)?;
                Ok(Value::String(out))
            }
            Node::Expression { expr, formatters } => {
                let value = self.expr(expr)?;
                self.apply_formatters(value, formatters)
            }
        }
    }

    fn reference(&mut self, r: &VarRef) -> Result<Value, EvalError> {
        if !self.snapshot.contains(&r.name) {
            if self.mode == EvalMode::Strict {
                return Err(EvalError::UnknownVariable(r.name.clone()));
            }
            self.diag(DiagnosticKind::UnknownVariable, format!("unknown variable '@{}'", r.name));
            let verbatim = to_source(&Ast { nodes: vec![Node::VariableRef(r.clone())] });
            return Ok(Value::String(verbatim));
        }
        let value = self.lookup(&r.name, &r.path)?;
        self.apply_formatters(value, &r.formatters)
    }

    /// Resolve a registered variable and walk its path. Unknown names are
    /// handled by the caller.
    fn lookup(&mut self, name: &str, path: &[PathSegment]) -> Result<Value, EvalError> {
        let Some(value) = self.snapshot.value(name) else {
            self.diag(DiagnosticKind::Unset, format!("'@{name}' has no value"));
            return Ok(Value::Null);
        };
        match resolve_path(value, path) {
            Some(found) => Ok(found.clone()),
            None => {
                self.diag(DiagnosticKind::MissingPath, format!("'@{name}' has no such field"));
                Ok(Value::Null)
            }
        }
    }

    fn apply_formatters(&mut self, mut value: Value, chain: &[Formatter]) -> Result<Value, EvalError> {
        for formatter in chain {
            if !formatters::is_known(&formatter.name) {
                self.diag(DiagnosticKind::UnknownFormatter, format!("unknown formatter '{}'", formatter.name));
                continue;
            }
            match formatters::apply(formatter, value.clone()) {
                Ok(next) => value = next,
                Err(err) if self.mode == EvalMode::Preview => {
                    self.diag(DiagnosticKind::Formatter, err.to_string());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(value)
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Var { name, path } => {
                if !self.snapshot.contains(name) {
                    if self.mode == EvalMode::Strict {
                        return Err(EvalError::UnknownVariable(name.clone()));
                    }
                    self.diag(DiagnosticKind::UnknownVariable, format!("unknown variable '@{name}'"));
                    return Ok(Value::Null);
                }
                self.lookup(name, path)
            }
            Expr::Op { op: Operator::And, operands } => {
                for operand in operands {
                    if !truthy(&self.expr(operand)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Op { op: Operator::Or, operands } => {
                for operand in operands {
                    if truthy(&self.expr(operand)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Op { op, operands } => {
                let values = operands.iter().map(|o| self.expr(o)).collect::<Result<Vec<_>, _>>()?;
                apply_operator(*op, &values)
            }
        }
    }
}

fn resolve_path<'v>(mut value: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
    for segment in path {
        value = match segment {
            PathSegment::Field(key) | PathSegment::Key(key) => value.as_object()?.get(key)?,
            PathSegment::Index(i) => value.as_array()?.get(*i)?,
        };
    }
    Some(value)
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Integral results stay integers so `{{ @a + 1 }}` renders as `3`, not `3.0`.
fn number(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

fn as_number(op: Operator, value: &Value) -> Result<f64, EvalError> {
    value.as_f64().ok_or_else(|| EvalError::Type {
        op: op.symbol(),
        message: format!("expected a number, got {}", crate::vars::validation::describe(value)),
    })
}

fn apply_operator(op: Operator, values: &[Value]) -> Result<Value, EvalError> {
    let [left, right] = match values {
        [single] => {
            return match op {
                Operator::Not => Ok(Value::Bool(!truthy(single))),
                Operator::Neg => Ok(number(-as_number(op, single)?)),
                _ => Err(EvalError::Type { op: op.symbol(), message: "missing operand".into() }),
            };
        }
        [left, right] => [left, right],
        _ => return Err(EvalError::Type { op: op.symbol(), message: "wrong operand count".into() }),
    };

    match op {
        Operator::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(format!("{}{}", to_text(left), to_text(right))))
        }
        Operator::Add => Ok(number(as_number(op, left)? + as_number(op, right)?)),
        Operator::Sub => Ok(number(as_number(op, left)? - as_number(op, right)?)),
        Operator::Mul => Ok(number(as_number(op, left)? * as_number(op, right)?)),
        Operator::Div | Operator::Mod => {
            let (l, r) = (as_number(op, left)?, as_number(op, right)?);
            if r == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(number(if op == Operator::Div { l / r } else { l % r }))
        }
        Operator::Eq => Ok(Value::Bool(loosely_equal(left, right))),
        Operator::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            let ordering = compare(left, right).ok_or_else(|| EvalError::Type {
                op: op.symbol(),
                message: "operands must both be numbers or both be strings".into(),
            })?;
            Ok(Value::Bool(match op {
                Operator::Lt => ordering == Ordering::Less,
                Operator::Le => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        Operator::And => Ok(Value::Bool(truthy(left) && truthy(right))),
        Operator::Or => Ok(Value::Bool(truthy(left) || truthy(right))),
        Operator::Not | Operator::Neg => {
            Err(EvalError::Type { op: op.symbol(), message: "unary operator given two operands".into() })
        }
    }
}

/// `1 == 1.0`; everything else compares structurally.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::interpolation::parse;
    use crate::vars::{SnapshotEntry, VarType};
    use serde_json::json;

    fn snapshot(vars: &[(&str, Option<Value>)]) -> VariableSnapshot {
        VariableSnapshot::new(
            vars.iter()
                .map(|(name, value)| {
                    (name.to_string(), SnapshotEntry { value: value.clone(), version: 1, var_type: VarType::String })
                })
                .collect(),
        )
    }

    fn strict(src: &str, snap: &VariableSnapshot) -> Result<Value, EvalError> {
        evaluate_with(&parse(src).ast, snap, EvalMode::Strict).value
    }

    #[test]
    fn test_price_currency() {
        let snap = snapshot(&[("price", Some(json!(10)))]);
        assert_eq!(strict("Total: @price|currency", &snap).unwrap(), json!("Total: $10.00"));
    }

    #[test]
    fn test_single_reference_keeps_type() {
        let snap = snapshot(&[("tags", Some(json!(["a", "b"])))]);
        assert_eq!(strict("@tags", &snap).unwrap(), json!(["a", "b"]));
        assert_eq!(strict("{{ @tags[1] }}", &snap).unwrap(), json!("b"));
    }

    #[test]
    fn test_path_access() {
        let snap = snapshot(&[("user", Some(json!({"name": "Ada", "address": {"city": "London"}})))]);
        assert_eq!(strict("@user.address.city", &snap).unwrap(), json!("London"));
        assert_eq!(strict(r#"@user["name"]|upperCase"#, &snap).unwrap(), json!("ADA"));
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let snap = snapshot(&[("a", Some(json!(7))), ("b", Some(json!(2)))]);
        assert_eq!(strict("{{ @a + @b * 3 }}", &snap).unwrap(), json!(13));
        assert_eq!(strict("{{ @a / @b }}", &snap).unwrap(), json!(3.5));
        assert_eq!(strict("{{ @a % @b }}", &snap).unwrap(), json!(1));
        assert_eq!(strict("{{ -@a }}", &snap).unwrap(), json!(-7));
        assert_eq!(strict("{{ @a > @b && !(@b == 2.0) }}", &snap).unwrap(), json!(false));
        assert_eq!(strict(r#"{{ "n=" + @a }}"#, &snap).unwrap(), json!("n=7"));
    }

    #[test]
    fn test_division_by_zero_fails_strict() {
        let snap = snapshot(&[("a", Some(json!(1)))]);
        assert!(matches!(strict("{{ @a / 0 }}", &snap), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn test_conditionals() {
        let snap = snapshot(&[("vip", Some(json!(true))), ("name", Some(json!("Ada")))]);
        let src = "{{#if @vip}}Dear @name{{else}}Hello{{/if}}!";
        assert_eq!(strict(src, &snap).unwrap(), json!("Dear Ada!"));
        let snap = snapshot(&[("vip", Some(json!(false))), ("name", Some(json!("Ada")))]);
        assert_eq!(strict(src, &snap).unwrap(), json!("Hello!"));
    }

    #[test]
    fn test_unknown_variable_strict_vs_preview() {
        let snap = snapshot(&[]);
        assert!(matches!(strict("Hi @ghost", &snap), Err(EvalError::UnknownVariable(n)) if n == "ghost"));

        let result = evaluate_with(&parse("Hi @ghost|upperCase").ast, &snap, EvalMode::Preview);
        assert_eq!(result.value.unwrap(), json!("Hi @ghost|upperCase"));
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::UnknownVariable);
    }

    #[test]
    fn test_unset_renders_empty_or_null() {
        let snap = snapshot(&[("nick", None)]);
        let text = evaluate_with(&parse("Hi @nick!").ast, &snap, EvalMode::Strict);
        assert_eq!(text.value.unwrap(), json!("Hi !"));
        assert_eq!(text.diagnostics[0].kind, DiagnosticKind::Unset);

        let typed = evaluate_with(&parse("@nick").ast, &snap, EvalMode::Strict);
        assert_eq!(typed.value.unwrap(), Value::Null);
    }

    #[test]
    fn test_unknown_formatter_passes_value_through() {
        let snap = snapshot(&[("name", Some(json!("ada")))]);
        let result = evaluate_with(&parse("@name|sparkle|upperCase").ast, &snap, EvalMode::Strict);
        assert_eq!(result.value.unwrap(), json!("ADA"));
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::UnknownFormatter);
    }

    #[test]
    fn test_preview_never_fails() {
        let snap = snapshot(&[("a", Some(json!("x")))]);
        let result = evaluate_with(&parse("v={{ @a * 2 }} {{ @a | currency }}").ast, &snap, EvalMode::Preview);
        assert_eq!(result.value.unwrap(), json!("v= x"));
        assert_eq!(result.diagnostics.len(), 2);
    }

    #[test]
    fn test_cached_evaluation_never_serves_stale_values() {
        let cache = PerformanceCache::new(&CacheConfig::default());
        let template = ParsedTemplate::new("Total: @price|currency");
        let tags = BTreeSet::new();

        let first = snapshot(&[("price", Some(json!(10)))]);
        let (r, hit) = evaluate_cached(&template, &first, EvalMode::Strict, &cache, &tags);
        assert_eq!((r.text().unwrap().as_str(), hit), ("Total: $10.00", false));
        let (_, hit) = evaluate_cached(&template, &first, EvalMode::Strict, &cache, &tags);
        assert!(hit);

        let second = VariableSnapshot::new(
            [("price".to_string(), SnapshotEntry { value: Some(json!(20)), version: 2, var_type: VarType::Number })]
                .into(),
        );
        let (r, hit) = evaluate_cached(&template, &second, EvalMode::Strict, &cache, &tags);
        assert_eq!((r.text().unwrap().as_str(), hit), ("Total: $20.00", false));
    }

    #[test]
    fn test_static_templates_are_interned() {
        let cache = PerformanceCache::new(&CacheConfig::default());
        let template = ParsedTemplate::new("Welcome aboard");
        let snap = snapshot(&[]);
        evaluate_cached(&template, &snap, EvalMode::Strict, &cache, &BTreeSet::new());
        evaluate_cached(&template, &snap, EvalMode::Strict, &cache, &BTreeSet::new());
        assert_eq!(cache.stats().intern.hits, 1);
    }
}
