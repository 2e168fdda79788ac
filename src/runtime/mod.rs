//! Runtime Module
//!
//! Background execution primitives used by the coordinator:
//! - Cyclic scheduler with a per-tick failure boundary
//! - Bounded task executor with retained task results
//! - Supervision with restart policies and shutdown signals

pub mod executor;
pub mod scheduler;
pub mod supervisor;

pub use executor::{TaskExecutor, TaskHandle};
pub use scheduler::{CyclicScheduler, FailureHook, SchedulerHandle, SchedulerState};
pub use supervisor::{supervise, RestartPolicy, Shutdown, ShutdownSignal, SupervisorEvent};
