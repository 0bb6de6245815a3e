use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

const CAMPAIGN: &str = r#"
sections:
  - id: ask_price
    type: question
    prompt: "Price?"
    output: { name: price, type: number }
  - { id: total, type: content, body: "Total: @price|currency" }
  - { id: receipt, type: output, template: "Paid @price" }
  - { id: footer, type: content, body: "Thanks" }
"#;

fn setup() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("campaign.yaml");
    fs::write(&path, CAMPAIGN).unwrap();
    (tmp, path)
}

fn fv(config_home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fv"));
    cmd.env("XDG_CONFIG_HOME", config_home);
    cmd
}

#[test]
fn order_puts_producers_before_readers() {
    let (tmp, campaign) = setup();

    let out = fv(tmp.path()).args(["--json", "order"]).arg(&campaign).output().unwrap();
    assert!(out.status.success());

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let order: Vec<String> = serde_json::from_value(json["order"].clone()).unwrap();
    let pos = |node: &str| order.iter().position(|n| n == node).unwrap();

    assert!(pos("section:ask_price") < pos("var:price"));
    assert!(pos("var:price") < pos("section:total"));
    assert!(pos("var:price") < pos("section:receipt"));
    assert!(order.contains(&"section:footer".to_string()));
    assert!(json["waves"].as_array().unwrap().len() >= 3);
}

#[test]
fn order_text_is_numbered() {
    let (tmp, campaign) = setup();

    fv(tmp.path())
        .arg("order")
        .arg(&campaign)
        .assert()
        .success()
        .stdout(predicate::str::contains("  1. "))
        .stdout(predicate::str::contains("var:price"));
}

#[test]
fn impact_lists_every_reader() {
    let (tmp, campaign) = setup();

    fv(tmp.path())
        .args(["impact"])
        .arg(&campaign)
        .arg("@price")
        .assert()
        .success()
        .stdout(predicate::str::contains("removing @price affects 2 node(s):"))
        .stdout(predicate::str::contains("section:total"))
        .stdout(predicate::str::contains("section:receipt"))
        .stdout(predicate::str::contains("section:footer").not());
}

#[test]
fn impact_of_unknown_variable_fails() {
    let (tmp, campaign) = setup();

    fv(tmp.path())
        .arg("impact")
        .arg(&campaign)
        .arg("discount")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no section declares or reads '@discount'"));
}
