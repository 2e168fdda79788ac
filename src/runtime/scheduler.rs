//! Cyclic scheduler.
//!
//! Invokes an action at a fixed period on a background task until stopped.
//! Every invocation runs inside its own failure boundary: an `Err` or a panic
//! is logged and reported, and the loop carries on with the next tick.

use crate::core::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Called with the tick number and error when an invocation fails.
pub type FailureHook = Arc<dyn Fn(u64, &Error) + Send + Sync>;

/// Observable scheduler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// Loop running
    Running,
    /// Stop requested, loop not yet exited
    Stopping,
    /// Loop exited
    Stopped,
}

/// A periodic action, not yet started.
///
/// `start` consumes the scheduler, so each one runs at most once.
pub struct CyclicScheduler<F> {
    name: String,
    period: Duration,
    action: F,
    on_failure: Option<FailureHook>,
}

impl<F, Fut> CyclicScheduler<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Bind an action to a period.
    pub fn new(name: &str, period: Duration, action: F) -> Self {
        Self {
            name: name.to_string(),
            period,
            action,
            on_failure: None,
        }
    }

    /// Report failed invocations to `hook`.
    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the loop on the ambient tokio runtime.
    pub fn start(self) -> Result<SchedulerHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let control = Arc::new(Control::default());
        let ticks = Arc::new(AtomicU64::new(0));
        let name = self.name.clone();
        let period = self.period;

        let join = runtime.spawn(run_loop(self, control.clone(), ticks.clone()));
        info!(scheduler = %name, period_ms = period.as_millis() as u64, "Cyclic scheduler started");

        Ok(SchedulerHandle {
            name,
            period,
            control,
            ticks,
            join,
        })
    }
}

#[derive(Default)]
struct Control {
    stop_requested: AtomicBool,
    wake: Notify,
}

async fn run_loop<F, Fut>(scheduler: CyclicScheduler<F>, control: Arc<Control>, ticks: Arc<AtomicU64>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let CyclicScheduler {
        name,
        period,
        mut action,
        on_failure,
    } = scheduler;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = control.wake.notified() => {}
        }
        if control.stop_requested.load(Ordering::SeqCst) {
            break;
        }

        let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = AssertUnwindSafe(async { action().await }).catch_unwind().await;

        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(scheduler = %name, tick, "Tick completed");
                None
            }
            Ok(Err(e)) => {
                warn!(scheduler = %name, tick, error = %e, "Tick failed, continuing");
                Some(e)
            }
            Err(panic) => {
                let e = Error::AggregationRound(format!("panicked: {}", panic_message(&*panic)));
                error!(scheduler = %name, tick, error = %e, "Tick panicked, continuing");
                Some(e)
            }
        };

        if let (Some(e), Some(hook)) = (failure, on_failure.as_ref()) {
            hook(tick, &e);
        }
    }

    info!(scheduler = %name, ticks = ticks.load(Ordering::SeqCst), "Cyclic scheduler stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running scheduler.
///
/// Dropping the handle detaches the loop; it keeps running.
pub struct SchedulerHandle {
    name: String,
    period: Duration,
    control: Arc<Control>,
    ticks: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Scheduler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Invocations started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        if self.join.is_finished() {
            SchedulerState::Stopped
        } else if self.control.stop_requested.load(Ordering::SeqCst) {
            SchedulerState::Stopping
        } else {
            SchedulerState::Running
        }
    }

    /// Ask the loop to exit at its next suspension point.
    ///
    /// An invocation already in progress is allowed to finish.
    pub fn stop(&self) {
        self.control.stop_requested.store(true, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    /// Stop and wait for the loop to exit.
    pub async fn stop_and_join(self) -> Result<()> {
        self.stop();
        self.join.await.map_err(|e| Error::TaskFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }
}
