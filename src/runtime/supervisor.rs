//! Supervision of long-running background activities.
//!
//! A supervised activity is re-run according to a [`RestartPolicy`] when it
//! fails, until it succeeds, the policy gives up, or shutdown is signalled.

use crate::core::{Error, Result};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What to do when a supervised activity fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Give up after the first failure
    Never,
    /// Restart with exponential backoff
    OnFailure {
        /// Restarts before giving up
        max_restarts: u32,
        /// Delay before the first restart (ms)
        backoff_ms: u64,
        /// Upper bound on the delay (ms)
        max_backoff_ms: u64,
    },
}

impl RestartPolicy {
    /// Delay before restart number `restart` (1-based), or `None` to give up.
    pub fn delay_for(&self, restart: u32) -> Option<Duration> {
        match self {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure {
                max_restarts,
                backoff_ms,
                max_backoff_ms,
            } => {
                if restart == 0 || restart > *max_restarts {
                    return None;
                }
                let exp = backoff_ms.saturating_mul(1u64 << (restart - 1).min(16));
                let base = exp.min(*max_backoff_ms);
                // up to 25% jitter either way
                let jitter = base / 4;
                let offset = if jitter > 0 {
                    thread_rng().gen_range(0..=jitter * 2) as i64 - jitter as i64
                } else {
                    0
                };
                Some(Duration::from_millis((base as i64 + offset).max(0) as u64))
            }
        }
    }

    /// Whether any restart is allowed.
    pub fn restarts(&self) -> bool {
        matches!(self, RestartPolicy::OnFailure { max_restarts, .. } if *max_restarts > 0)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::OnFailure {
            max_restarts: 3,
            backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Sending side of a shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create an untriggered shutdown.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver for background activities.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown was triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a shutdown signal.
///
/// If the [`Shutdown`] is dropped without triggering, waiting never
/// completes: the activity keeps running for the process lifetime.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown was triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Lifecycle notifications from [`supervise`].
#[derive(Clone, Debug, PartialEq)]
pub enum SupervisorEvent {
    /// Attempt `attempt` (1-based) is starting
    Starting { attempt: u32 },
    /// Attempt failed
    Failed {
        attempt: u32,
        error: String,
        will_restart: bool,
    },
    /// Activity ended cleanly
    Stopped { attempt: u32 },
}

/// Run `activity` under `policy` until it ends cleanly, gives up, or
/// `shutdown` fires.
///
/// Configuration errors are never retried.
pub async fn supervise<F, Fut, E>(
    name: &str,
    policy: &RestartPolicy,
    mut shutdown: ShutdownSignal,
    mut activity: F,
    mut on_event: E,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
    E: FnMut(SupervisorEvent),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        on_event(SupervisorEvent::Starting { attempt });

        let err = match activity().await {
            Ok(()) => {
                info!(activity = %name, attempt, "Supervised activity stopped");
                on_event(SupervisorEvent::Stopped { attempt });
                return Ok(());
            }
            Err(e) => e,
        };

        if shutdown.is_triggered() {
            info!(activity = %name, attempt, error = %err, "Activity failed during shutdown");
            on_event(SupervisorEvent::Stopped { attempt });
            return Ok(());
        }

        let retryable = !matches!(err, Error::Configuration(_));
        let delay = if retryable { policy.delay_for(attempt) } else { None };

        on_event(SupervisorEvent::Failed {
            attempt,
            error: err.to_string(),
            will_restart: delay.is_some(),
        });

        let Some(delay) = delay else {
            error!(activity = %name, attempt, error = %err, "Supervised activity failed, giving up");
            return Err(err);
        };

        warn!(
            activity = %name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Supervised activity failed, restarting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait() => {
                info!(activity = %name, "Shutdown during restart backoff");
                on_event(SupervisorEvent::Stopped { attempt });
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy::OnFailure {
            max_restarts,
            backoff_ms: 10,
            max_backoff_ms: 100,
        }
    }

    fn failure() -> Error {
        Error::EndpointStart {
            address: "127.0.0.1:1".to_string(),
            reason: "denied".to_string(),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RestartPolicy::OnFailure {
            max_restarts: 10,
            backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let first = policy.delay_for(1).unwrap();
        assert!(first >= Duration::from_millis(75) && first <= Duration::from_millis(125));
        let capped = policy.delay_for(9).unwrap();
        assert!(capped <= Duration::from_millis(1_250));
        assert!(policy.delay_for(11).is_none());
        assert!(RestartPolicy::Never.delay_for(1).is_none());
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&RestartPolicy::default()).unwrap();
        assert!(json.contains("on_failure"));
        let never: RestartPolicy = serde_json::from_str(r#"{"kind":"never"}"#).unwrap();
        assert_eq!(never, RestartPolicy::Never);
        assert!(!never.restarts());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_until_exhausted() {
        let shutdown = Shutdown::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let mut events = Vec::new();

        let result = supervise(
            "flaky",
            &quick_policy(2),
            shutdown.signal(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(failure()) }
            },
            |e| events.push(e),
        )
        .await;

        assert!(matches!(result, Err(Error::EndpointStart { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let failures: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::Failed { will_restart, .. } => Some(*will_restart),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failure() {
        let shutdown = Shutdown::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = supervise(
            "recovering",
            &quick_policy(3),
            shutdown.signal(),
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(failure())
                    } else {
                        Ok(())
                    }
                }
            },
            |_| {},
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let shutdown = Shutdown::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = supervise(
            "misconfigured",
            &quick_policy(5),
            shutdown.signal(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Configuration("bad host".to_string())) }
            },
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let policy = RestartPolicy::OnFailure {
            max_restarts: 5,
            backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };

        let task = tokio::spawn(async move {
            supervise("slow", &policy, signal, || async { Err(failure()) }, |_| {}).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_signal_wait() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(!signal.is_triggered());
        shutdown.trigger();
        signal.wait().await;
        assert!(signal.is_triggered());
    }
}
