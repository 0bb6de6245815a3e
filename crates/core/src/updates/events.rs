use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::graph::NodeRef;
use crate::runtime::{Diagnostic, EvalError, NodeStatus, PassReport};
use crate::vars::VariableSnapshot;

/// Notification for subscribers (the UI layer).
///
/// Everything a cascade produces is published only after it commits; a
/// cancelled cascade publishes nothing but [`UpdateEvent::CascadeCancelled`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpdateEvent {
    CascadeStarted { cascade: Uuid, roots: Vec<String> },
    CascadeCancelled { cascade: Uuid },
    VariableChanged { variable: String, new_value: Value },
    SectionUpdated { section: String, rendered: BTreeMap<String, String> },
    NodeBlocked { node: String, failed: String },
    NodeFailed { node: String, error: String },
    Diagnostics { section: String, diagnostics: Vec<Diagnostic> },
    CascadeCommitted { cascade: Uuid, roots: Vec<String>, changed: Vec<String> },
}

/// Events describing a committed cascade, in publication order: the root
/// values, the values the pass wrote, then one event per evaluated node.
pub(crate) fn committed_events(
    cascade: Uuid,
    roots: &[String],
    snapshot: &VariableSnapshot,
    report: &PassReport,
) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    for root in roots {
        events.push(UpdateEvent::VariableChanged {
            variable: root.clone(),
            new_value: snapshot.value(root).cloned().unwrap_or(Value::Null),
        });
    }
    for change in &report.committed {
        events.push(UpdateEvent::VariableChanged { variable: change.name.clone(), new_value: change.new.clone() });
    }

    for node in &report.order {
        let Some(outcome) = report.outcomes.get(node) else { continue };
        match outcome.status {
            NodeStatus::Evaluated | NodeStatus::Cached => {
                if let Some(section) = NodeRef::parse(node).as_section() {
                    events.push(UpdateEvent::SectionUpdated {
                        section: section.to_string(),
                        rendered: outcome.rendered.clone(),
                    });
                    if !outcome.diagnostics.is_empty() {
                        events.push(UpdateEvent::Diagnostics {
                            section: section.to_string(),
                            diagnostics: outcome.diagnostics.clone(),
                        });
                    }
                }
            }
            NodeStatus::Blocked => {
                let failed = match &outcome.error {
                    Some(EvalError::Blocked { failed }) => failed.clone(),
                    _ => String::new(),
                };
                events.push(UpdateEvent::NodeBlocked { node: node.clone(), failed });
            }
            NodeStatus::Failed | NodeStatus::Cancelled => {
                let error = outcome.error.as_ref().map(ToString::to_string).unwrap_or_default();
                events.push(UpdateEvent::NodeFailed { node: node.clone(), error });
            }
        }
    }

    events.push(UpdateEvent::CascadeCommitted {
        cascade,
        roots: roots.to_vec(),
        changed: report.committed.iter().map(|c| c.name.clone()).collect(),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialises_with_tag() {
        let event = UpdateEvent::VariableChanged { variable: "price".into(), new_value: json!(20) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"event": "variable_changed", "variable": "price", "new_value": 20}));
    }

    #[test]
    fn test_committed_events_end_with_commit_marker() {
        let report = PassReport::default();
        let snapshot = VariableSnapshot::default();
        let id = Uuid::new_v4();
        let events = committed_events(id, &["price".to_string()], &snapshot, &report);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], UpdateEvent::VariableChanged { variable: "price".into(), new_value: Value::Null });
        assert!(matches!(&events[1], UpdateEvent::CascadeCommitted { cascade, .. } if *cascade == id));
    }
}
