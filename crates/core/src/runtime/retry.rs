use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::provider::{LogicOutput, LogicProvider, LogicRequest, ProviderError};
use crate::config::ProviderConfig;

/// Bounded exponential backoff around provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt limit.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Call the provider until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `cancel` fires. `on_retry` sees each failed
    /// attempt that will be retried.
    pub async fn run(
        &self,
        provider: &dyn LogicProvider,
        request: &LogicRequest,
        cancel: &CancellationToken,
        mut on_retry: impl FnMut(u32, &ProviderError),
    ) -> Result<LogicOutput, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                r = tokio::time::timeout(self.timeout, provider.complete(request)) => {
                    r.unwrap_or(Err(ProviderError::Timeout(self.timeout)))
                }
            };
            let err = match result.and_then(|out| out.ensure_fields(&request.fields).map(|()| out)) {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(ProviderError::Exhausted { attempts: attempt, last: Box::new(err) });
            }

            let delay = self.delay_after(attempt);
            warn!(
                node = %request.node_id,
                provider = provider.name(),
                attempt,
                ?delay,
                error = %err,
                "provider call failed, retrying"
            );
            on_retry(attempt, &err);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::provider::ProviderFuture;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl LogicProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn complete<'a>(&'a self, _request: &'a LogicRequest) -> ProviderFuture<'a> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= self.failures {
                    Err(ProviderError::Request(format!("boom {n}")))
                } else {
                    Ok(LogicOutput { fields: BTreeMap::from([("out".to_string(), json!(n))]) })
                }
            })
        }
    }

    fn request() -> LogicRequest {
        LogicRequest { node_id: "logic".into(), prompt: "p".into(), fields: vec!["out".into()] }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_attempts() {
        let provider = Flaky { failures: 2, calls: AtomicU32::new(0) };
        let mut retries = 0;
        let out = RetryPolicy::default()
            .run(&provider, &request(), &CancellationToken::new(), |_, _| retries += 1)
            .await
            .unwrap();
        assert_eq!(out.fields["out"], json!(3));
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_failures() {
        let provider = Flaky { failures: 3, calls: AtomicU32::new(0) };
        let err = RetryPolicy::default()
            .run(&provider, &request(), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Exhausted { attempts: 3, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_backoff() {
        let provider = Flaky { failures: 10, calls: AtomicU32::new(0) };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let err = RetryPolicy::default()
            .run(&provider, &request(), &cancel, move |_, _| trigger.cancel())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
