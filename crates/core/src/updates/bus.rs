//! Change dispatch: root variable changes in, committed cascades out.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::events::{UpdateEvent, committed_events};
use crate::config::UpdatesConfig;
use crate::graph::{DependencyTracker, var_node};
use crate::runtime::{ExecutionContext, RuntimeEngine};
use crate::sections::SectionSet;
use crate::sync::lock;

/// Graph nodes to re-evaluate after `roots` changed, in dependency order.
///
/// Only dependents are included; the roots' own producers are not re-run.
pub fn cascade_order(tracker: &DependencyTracker, roots: &BTreeSet<String>) -> Vec<String> {
    let mut affected = BTreeSet::new();
    for root in roots {
        let node = var_node(root);
        affected.extend(tracker.transitive_dependents(&node));
        affected.insert(node);
    }
    match tracker.topological_order() {
        Ok(order) => order.into_iter().filter(|n| affected.contains(n)).collect(),
        Err(err) => {
            warn!(error = %err, "graph cannot be ordered, cascade skipped");
            Vec::new()
        }
    }
}

#[derive(Clone)]
struct Shared {
    engine: RuntimeEngine,
    sections: Arc<RwLock<SectionSet>>,
    events: broadcast::Sender<UpdateEvent>,
    debounce: Duration,
}

struct Active {
    roots: BTreeSet<String>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Observer-style dispatcher for variable changes.
///
/// Changes queue on an inbox drained by one worker task. Changes that
/// arrive together (or within the debounce window) form one cascade. A
/// change arriving while a cascade is still running cancels it and the
/// next cascade covers both sets of roots.
pub struct UpdateBus {
    inbox: mpsc::UnboundedSender<Vec<String>>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Vec<String>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Shared,
}

impl std::fmt::Debug for UpdateBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBus")
            .field("subscribers", &self.shared.events.receiver_count())
            .field("debounce", &self.shared.debounce)
            .finish_non_exhaustive()
    }
}

impl UpdateBus {
    pub fn new(engine: RuntimeEngine, sections: Arc<RwLock<SectionSet>>, config: &UpdatesConfig) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inbox,
            pending: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            shared: Shared { engine, sections, events, debounce: config.debounce() },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.shared.events.subscribe()
    }

    /// Queue a cascade for `variables`, whose new values are already
    /// committed to the registry.
    ///
    /// The worker starts on the first call made inside a tokio runtime;
    /// changes queued before that wait for it.
    pub fn notify(&self, variables: Vec<String>) {
        if variables.is_empty() {
            return;
        }
        if self.inbox.send(variables).is_err() {
            warn!("update worker is gone, change dropped");
            return;
        }
        self.ensure_worker();
    }

    fn ensure_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("no async runtime yet, cascade deferred");
            return;
        };
        let Some(rx) = lock(&self.pending).take() else { return };
        *worker = Some(handle.spawn(run_worker(rx, self.shared.clone())));
    }
}

impl Drop for UpdateBus {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.worker).take() {
            handle.abort();
        }
    }
}

async fn run_worker(mut inbox: mpsc::UnboundedReceiver<Vec<String>>, shared: Shared) {
    let mut active: Option<Active> = None;

    while let Some(first) = inbox.recv().await {
        let mut roots: BTreeSet<String> = first.into_iter().collect();
        while let Ok(more) = inbox.try_recv() {
            roots.extend(more);
        }
        if !shared.debounce.is_zero() {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(shared.debounce) => break,
                    more = inbox.recv() => match more {
                        Some(more) => roots.extend(more),
                        None => break,
                    },
                }
            }
        }

        if let Some(prev) = active.take()
            && !prev.handle.is_finished()
        {
            shared.engine.supersede(&prev.token);
            roots.extend(prev.roots);
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_cascade(shared.clone(), roots.clone(), token.clone()));
        active = Some(Active { roots, token, handle });
    }
}

async fn run_cascade(shared: Shared, roots: BTreeSet<String>, token: CancellationToken) {
    let id = Uuid::new_v4();
    let roots_list: Vec<String> = roots.iter().cloned().collect();
    let metrics = shared.engine.metrics().clone();
    metrics.cascade_started();
    let _ = shared.events.send(UpdateEvent::CascadeStarted { cascade: id, roots: roots_list.clone() });

    let span = info_span!("cascade", %id, roots = ?roots_list);
    async {
        let order = cascade_order(shared.engine.tracker(), &roots);
        let sections = match shared.sections.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let mut ctx = ExecutionContext::new(shared.engine.registry().snapshot()).with_cancellation(token);
        let report = shared.engine.execute(&sections, order, &mut ctx).await;

        if report.cancelled {
            metrics.cascade_cancelled();
            debug!("cascade superseded");
            let _ = shared.events.send(UpdateEvent::CascadeCancelled { cascade: id });
            return;
        }

        metrics.cascade_committed();
        info!(nodes = report.outcomes.len(), changed = report.committed.len(), "cascade committed");
        for event in committed_events(id, &roots_list, ctx.snapshot(), &report) {
            // no subscribers is fine
            let _ = shared.events.send(event);
        }
    }
    .instrument(span)
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_order_covers_dependents_only() {
        let tracker = DependencyTracker::new();
        tracker
            .add_dependencies([
                ("section:quote", "var:price"),
                ("var:total", "section:quote"),
                ("section:summary", "var:total"),
                ("section:intro", "var:name"),
                ("var:price", "section:pricing"),
            ])
            .unwrap();

        let order = cascade_order(&tracker, &BTreeSet::from(["price".to_string()]));
        assert_eq!(order, vec!["var:price", "section:quote", "var:total", "section:summary"]);
    }
}
