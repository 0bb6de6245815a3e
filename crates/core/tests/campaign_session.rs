use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use flowvars_core::config::{EngineConfig, PublishPolicy};
use flowvars_core::graph::GraphError;
use flowvars_core::runtime::{DiagnosticKind, EvalError, FixtureProvider, NodeStatus, ProviderError};
use flowvars_core::sections::{CampaignDocument, OutputDecl, Section, SectionKind};
use flowvars_core::vars::{RegistryError, VarType};
use flowvars_core::{CampaignSession, SessionError};
use serde_json::json;

fn question(id: &str, output: &str, var_type: VarType) -> Section {
    Section::new(
        id,
        SectionKind::Question { prompt: format!("{id}?"), output: OutputDecl::new(output, var_type) },
    )
    .unwrap()
}

fn content(id: &str, body: &str) -> Section {
    Section::new(id, SectionKind::Content { body: body.into() }).unwrap()
}

fn session() -> CampaignSession {
    CampaignSession::new(EngineConfig::default(), Arc::new(FixtureProvider::default()))
}

#[test]
fn price_preview_follows_value_changes() {
    let s = session();
    s.add_section(question("ask_price", "price", VarType::Number), None).unwrap();
    s.add_section(content("total", "Total: @price|currency"), None).unwrap();

    s.set_value("price", json!(10)).unwrap();
    assert_eq!(s.render_preview("total").unwrap().rendered["body"], "Total: $10.00");

    s.set_value("price", json!(20)).unwrap();
    assert_eq!(s.render_preview("total").unwrap().rendered["body"], "Total: $20.00");
}

#[test]
fn rejected_write_keeps_previous_value() {
    let s = session();
    s.add_section(question("ask_price", "price", VarType::Number), None).unwrap();
    s.set_value("price", json!(10)).unwrap();

    let err = s.set_value("price", json!("ten")).unwrap_err();
    assert!(matches!(err, SessionError::Registry(RegistryError::Validation { .. })));
    assert_eq!(s.registry().get_value("price").unwrap(), Some(json!(10)));
}

#[test]
fn chain_edit_that_closes_a_cycle_is_rejected() {
    let s = session();
    s.add_section(question("a", "a_out", VarType::String), None).unwrap();
    let b = Section::new(
        "b",
        SectionKind::Capture { heading: Some("After @a_out".into()), fields: vec![OutputDecl::new("b_out", VarType::String)] },
    )
    .unwrap();
    s.add_section(b, None).unwrap();
    s.add_section(content("c", "@b_out and @a_out"), None).unwrap();

    let looped = Section::new(
        "a",
        SectionKind::Question { prompt: "Given @b_out?".into(), output: OutputDecl::new("a_out", VarType::String) },
    )
    .unwrap();
    let err = s.edit_section(looped).unwrap_err();
    assert!(matches!(err, SessionError::Graph(GraphError::CircularDependency { .. })));

    // the old definition and edges are untouched
    assert_eq!(s.section("a").unwrap().templates(), vec![("prompt", "a?")]);
    assert!(s.tracker().dependencies("section:a").is_empty());
    assert!(s.tracker().topological_order().is_ok());
}

#[test]
fn rejected_edit_keeps_output_type_and_value() {
    let s = session();
    s.add_section(question("q", "age", VarType::Number), None).unwrap();
    let logic = Section::new(
        "l",
        SectionKind::Logic { prompt: "Classify @age".into(), outputs: vec![OutputDecl::new("x", VarType::String)] },
    )
    .unwrap();
    s.add_section(logic, None).unwrap();
    s.set_value("age", json!(30)).unwrap();

    let retyped = Section::new(
        "q",
        SectionKind::Question { prompt: "Given @x?".into(), output: OutputDecl::new("age", VarType::Boolean) },
    )
    .unwrap();
    let err = s.edit_section(retyped).unwrap_err();
    assert!(matches!(err, SessionError::Graph(GraphError::CircularDependency { .. })));

    assert_eq!(s.registry().get("age").unwrap().var_type, VarType::Number);
    assert_eq!(s.registry().get_value("age").unwrap(), Some(json!(30)));
    assert_eq!(s.section("q").unwrap().templates(), vec![("prompt", "q?")]);
    assert!(s.tracker().dependencies("section:q").is_empty());
}

#[test]
fn edit_adding_an_output_registers_it_after_wiring() {
    let s = session();
    s.add_section(question("q", "age", VarType::Number), None).unwrap();
    s.set_value("age", json!(30)).unwrap();

    let widened = Section::new(
        "q",
        SectionKind::Capture {
            heading: None,
            fields: vec![OutputDecl::new("age", VarType::Number), OutputDecl::new("city", VarType::String)],
        },
    )
    .unwrap();
    s.edit_section(widened).unwrap();

    assert_eq!(s.registry().get_value("age").unwrap(), Some(json!(30)));
    assert_eq!(s.registry().get("city").unwrap().source_section.as_deref(), Some("q"));
    assert!(s.tracker().dependencies("var:city").contains("section:q"));
}

#[test]
fn preview_survives_bad_formatter_arguments() {
    let s = session();
    s.add_section(question("ask_when", "when", VarType::Date), None).unwrap();
    s.add_section(question("ask_n", "n", VarType::Number), None).unwrap();
    s.set_value("when", json!("2024-03-05")).unwrap();
    s.set_value("n", json!(1.5)).unwrap();

    let result = s.preview_text(r#"On @when|date("%Q"), @n|number(70000)"#);
    assert!(result.value.is_ok());
    let formatter_errors = result.diagnostics.iter().filter(|d| d.kind == DiagnosticKind::Formatter).count();
    assert_eq!(formatter_errors, 2);
}

#[test]
fn section_reading_its_own_output_is_rejected() {
    let s = session();
    let selfish = Section::new(
        "loop",
        SectionKind::Question { prompt: "Again @answer?".into(), output: OutputDecl::new("answer", VarType::String) },
    )
    .unwrap();

    assert!(matches!(s.add_section(selfish, None), Err(SessionError::Graph(_))));
    assert!(!s.registry().contains("answer"));
    assert!(s.sections().is_empty());
}

#[test]
fn two_sections_cannot_produce_the_same_variable() {
    let s = session();
    s.add_section(question("first", "email", VarType::Email), None).unwrap();
    let err = s.add_section(question("second", "email", VarType::Email), None).unwrap_err();
    assert!(matches!(err, SessionError::OutputConflict { section, .. } if section == "first"));
}

#[test]
fn removal_needs_confirmation_when_something_depends_on_it() {
    let s = session();
    s.add_section(question("ask_name", "name", VarType::String), None).unwrap();
    s.add_section(content("hello", "Hello @name"), None).unwrap();
    s.add_section(content("static", "No references"), None).unwrap();

    let impact = s.removal_impact("ask_name");
    assert_eq!(impact.dependents.into_iter().collect::<Vec<_>>(), vec!["section:hello"]);
    assert!(matches!(s.remove_section("ask_name", false), Err(SessionError::RemovalNotConfirmed { .. })));
    assert!(s.registry().contains("name"));

    s.remove_section("static", false).unwrap();
    s.remove_section("ask_name", true).unwrap();
    assert!(!s.registry().contains("name"));

    let report = s.validate();
    assert!(report.graph.missing.contains("var:name"));
    assert!(report.graph.unreachable.contains("section:hello"));
}

#[test]
fn warnings_block_publishing_only_when_configured() {
    let doc = r#"
sections:
  - { id: intro, type: content, body: "Welcome @visitor" }
  - id: ask_mood
    type: question
    prompt: "Mood?"
    output: { name: mood, type: string }
"#;
    let doc = CampaignDocument::from_yaml_str(doc, Path::new("inline.yaml")).unwrap();

    let lenient = CampaignSession::from_document(EngineConfig::default(), &doc).unwrap();
    let report = lenient.validate();
    assert!(report.publishable);
    assert!(report.unused_variables.contains("mood"));
    assert!(report.graph.missing.contains("var:visitor"));

    let config = EngineConfig { publish: PublishPolicy { block_on_warnings: true }, ..EngineConfig::default() };
    let strict = CampaignSession::from_document(config, &doc).unwrap();
    assert!(!strict.validate().publishable);
}

#[test]
fn parse_errors_block_publishing() {
    let s = session();
    s.add_section(content("broken", "Hi {{ @name "), None).unwrap();

    let report = s.validate();
    assert!(!report.publishable);
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].section, "broken");
}

#[test]
fn preview_reports_problems_instead_of_failing() {
    let s = session();
    s.add_section(question("ask_name", "name", VarType::String), None).unwrap();
    s.add_section(content("draft", "Hi @name, see @nobody {{ @name + "), None).unwrap();

    let preview = s.render_preview("draft").unwrap();
    assert_eq!(preview.status, NodeStatus::Evaluated);
    assert!(preview.rendered["body"].starts_with("Hi , see @nobody"));
    assert!(preview.diagnostics.len() >= 3);
}

#[test]
fn rebuild_restores_the_same_graph() {
    let s = session();
    s.add_section(question("ask_name", "name", VarType::String), None).unwrap();
    s.add_section(content("hello", "Hello @name"), None).unwrap();
    let before = s.tracker().topological_order().unwrap();

    s.rebuild().unwrap();
    assert_eq!(s.tracker().topological_order().unwrap(), before);
    assert_eq!(s.cache().sizes(), (0, 0, 0));
}

#[test]
fn move_section_changes_display_order_only() {
    let s = session();
    s.add_section(question("ask_name", "name", VarType::String), None).unwrap();
    s.add_section(content("hello", "Hello @name"), None).unwrap();
    let order = s.tracker().topological_order().unwrap();

    s.move_section("hello", 0).unwrap();
    assert_eq!(s.sections().ids(), ["hello", "ask_name"]);
    assert_eq!(s.tracker().topological_order().unwrap(), order);
}

#[tokio::test]
async fn evaluate_section_runs_its_subgraph_and_commits() {
    let provider = FixtureProvider::default().with("grader", BTreeMap::from([("score".to_string(), json!(8))]));
    let s = CampaignSession::new(EngineConfig::default(), Arc::new(provider));
    s.add_section(question("ask_name", "name", VarType::String), None).unwrap();
    let grader = Section::new(
        "grader",
        SectionKind::Logic { prompt: "Rate @name".into(), outputs: vec![OutputDecl::new("score", VarType::Number)] },
    )
    .unwrap();
    s.add_section(grader, None).unwrap();
    s.add_section(content("result", "@name scored @score"), None).unwrap();
    s.set_value("name", json!("Ada")).unwrap();

    let report = s.evaluate_section("result").await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.section("result").unwrap().rendered["body"], "Ada scored 8");
    assert_eq!(s.values()["score"], json!(8));
    assert_eq!(s.metrics().provider_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn failing_logic_does_not_stop_independent_sections() {
    let doc = r#"
sections:
  - id: ask_name
    type: question
    prompt: "Name?"
    output: { name: name, type: string }
  - { id: intro, type: content, body: "Hello @name" }
  - id: grader
    type: logic
    prompt: "Rate @name"
    outputs: [{ name: score, type: number }]
  - { id: verdict, type: output, template: "Score: @score" }
values:
  name: Ada
"#;
    let doc = CampaignDocument::from_yaml_str(doc, Path::new("inline.yaml")).unwrap();
    let s = CampaignSession::from_document(EngineConfig::default(), &doc).unwrap();

    let report = s.evaluate_all().await.unwrap();

    assert_eq!(report.section("intro").unwrap().rendered["body"], "Hello Ada");
    let grader = report.section("grader").unwrap();
    assert!(matches!(
        &grader.error,
        Some(EvalError::Provider { source: ProviderError::Exhausted { attempts: 3, .. }, .. })
    ));
    assert_eq!(report.section("verdict").unwrap().status, NodeStatus::Blocked);
    assert_eq!(s.metrics().provider_retries, 2);
}
