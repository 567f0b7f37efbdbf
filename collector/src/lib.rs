//! The collection scheduler: drives periodic metrics and liveness sweeps
//! over the tracked videos, with a bounded worker pool, per-task retry with
//! exponential backoff, and quota-aware suspension.
//!
//! One dispatch loop owns all scheduling state (ready queue, delay queue,
//! in-flight dedup map); workers only execute a single task attempt and
//! report the outcome back. Nothing in here reschedules itself; delayed
//! work always goes through the time-ordered delay queue.

#[macro_use]
extern crate tracing;

mod scheduler;
mod task;

pub use scheduler::{
    Scheduler,
    SchedulerConfig,
    SchedulerHandle,
    SchedulerStopped,
};
pub use task::{
    CollectionTask,
    TaskHandle,
    TaskKind,
    TaskState,
};
