use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::vars::VariableSnapshot;

/// Outcome of one node within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Evaluated,
    /// Served from the memo or response tier.
    Cached,
    Failed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub node: String,
    pub status: NodeStatus,
    pub at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub detail: Option<String>,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Request-scoped counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassMetrics {
    pub nodes_evaluated: u32,
    pub nodes_failed: u32,
    pub nodes_blocked: u32,
    pub cache_hits: u32,
    pub provider_calls: u32,
    pub provider_retries: u32,
}

/// Everything one evaluation pass reads and writes.
///
/// Built from a registry snapshot and thrown away afterwards. Writes are
/// staged here and only reach the registry when the pass commits.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: Uuid,
    pub session_data: BTreeMap<String, Value>,
    snapshot: VariableSnapshot,
    staged: BTreeMap<String, Value>,
    history: Vec<ExecutionRecord>,
    metrics: PassMetrics,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(snapshot: VariableSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_data: BTreeMap::new(),
            snapshot,
            staged: BTreeMap::new(),
            history: Vec::new(),
            metrics: PassMetrics::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_session_data(mut self, data: BTreeMap<String, Value>) -> Self {
        self.session_data = data;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Registry values as of pass start, overlaid with staged writes.
    pub fn snapshot(&self) -> &VariableSnapshot {
        &self.snapshot
    }

    /// Record a write to be committed at the end of the pass. Writing the
    /// value the snapshot already holds is a no-op and returns `false`.
    pub fn stage(&mut self, name: &str, value: Value) -> bool {
        if self.snapshot.value(name) == Some(&value) {
            return false;
        }
        self.snapshot.stage(name, value.clone());
        self.staged.insert(name.to_string(), value);
        true
    }

    pub fn staged(&self) -> &BTreeMap<String, Value> {
        &self.staged
    }

    pub fn take_staged(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.staged).into_iter().collect()
    }

    pub fn record(&mut self, node: &str, status: NodeStatus, elapsed: Duration, detail: Option<String>) {
        match status {
            NodeStatus::Evaluated => self.metrics.nodes_evaluated += 1,
            NodeStatus::Cached => {
                self.metrics.nodes_evaluated += 1;
                self.metrics.cache_hits += 1;
            }
            NodeStatus::Failed => self.metrics.nodes_failed += 1,
            NodeStatus::Blocked => self.metrics.nodes_blocked += 1,
            NodeStatus::Cancelled => {}
        }
        self.history.push(ExecutionRecord { node: node.to_string(), status, at: Utc::now(), elapsed, detail });
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn metrics(&self) -> PassMetrics {
        self.metrics
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut PassMetrics {
        &mut self.metrics
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
