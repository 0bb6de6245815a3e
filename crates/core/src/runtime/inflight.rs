//! Per-node in-progress guard.
//!
//! The first caller for a key runs the work; later callers for the same key
//! wait on its result instead of starting a duplicate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::provider::{LogicOutput, ProviderError};
use crate::sync::lock;

type Shared = Option<Result<LogicOutput, ProviderError>>;

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    pending: Mutex<HashMap<String, watch::Receiver<Shared>>>,
}

pub(crate) enum Claim {
    /// Caller owns the work and must finish it through the guard.
    Leader(InFlightGuard),
    /// Someone else is already running it.
    Follower(watch::Receiver<Shared>),
}

impl InFlight {
    pub(crate) fn claim(self: &Arc<Self>, key: &str) -> Claim {
        let mut pending = lock(&self.pending);
        if let Some(rx) = pending.get(key) {
            return Claim::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        pending.insert(key.to_string(), rx);
        Claim::Leader(InFlightGuard { key: key.to_string(), tx, owner: Arc::clone(self) })
    }

    #[cfg(test)]
    fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).contains_key(key)
    }
}

pub(crate) struct InFlightGuard {
    key: String,
    tx: watch::Sender<Shared>,
    owner: Arc<InFlight>,
}

impl InFlightGuard {
    /// Publish the result to any followers and release the key.
    pub(crate) fn complete(self, result: Result<LogicOutput, ProviderError>) {
        // followers hold receivers, so the value outlives the sender
        self.tx.send_replace(Some(result));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.owner.pending).remove(&self.key);
    }
}

/// Wait for a leader's result. A leader that went away without completing
/// (cancelled or panicked) reads as cancellation.
pub(crate) async fn follow(mut rx: watch::Receiver<Shared>) -> Result<LogicOutput, ProviderError> {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone().unwrap_or(Err(ProviderError::Cancelled)),
        Err(_) => Err(ProviderError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_follower_attaches_to_leader() {
        let inflight = Arc::new(InFlight::default());
        let Claim::Leader(guard) = inflight.claim("logic#1") else { panic!("expected leader") };
        let Claim::Follower(rx) = inflight.claim("logic#1") else { panic!("expected follower") };

        let waiter = tokio::spawn(follow(rx));
        let output = LogicOutput { fields: BTreeMap::from([("x".to_string(), json!(1))]) };
        guard.complete(Ok(output.clone()));

        assert_eq!(waiter.await.unwrap(), Ok(output));
        assert!(!inflight.is_pending("logic#1"));
    }

    #[tokio::test]
    async fn test_dropped_leader_reads_as_cancelled() {
        let inflight = Arc::new(InFlight::default());
        let Claim::Leader(guard) = inflight.claim("k") else { panic!() };
        let Claim::Follower(rx) = inflight.claim("k") else { panic!() };
        assert!(inflight.is_pending("k"));
        drop(guard);
        assert!(!inflight.is_pending("k"));
        assert_eq!(follow(rx).await, Err(ProviderError::Cancelled));
        assert!(matches!(inflight.claim("k"), Claim::Leader(_)));
    }
}
