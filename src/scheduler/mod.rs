//! Scheduler
//!
//! Drives periodic execution of the writer and reader tasks at independent
//! intervals.
//!
//! # Policy
//!
//! - Each task is ticked from its own tokio task, so a slow task never
//!   delays another task's schedule.
//! - **Skip**: a tick that falls due while the same task is still running is
//!   dropped, giving at most one in-flight invocation per task.
//! - Cancellation is observed only between invocations; once observed, no
//!   new invocation starts.
//! - Shutdown waits for in-flight invocations up to a grace period, then
//!   aborts whatever is left.

mod periodic;

pub use periodic::{PeriodicTask, Scheduler, ShutdownReport, TaskStats};
