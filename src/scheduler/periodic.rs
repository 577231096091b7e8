//! Periodic task runner
//!
//! Each registered task runs on its own tokio task driven by a monotonic
//! `tokio::time::interval`. Ticks that fall due while the task's previous
//! invocation is still running are skipped, so a task never overlaps itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

// =============================================================================
// Task Trait
// =============================================================================

/// A unit of periodic work.
///
/// `tick` must not fail: implementations handle their own errors and
/// report them however they see fit.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    async fn tick(&self);
}

// =============================================================================
// Task Statistics
// =============================================================================

#[derive(Debug, Default)]
struct TaskCounters {
    invocations: AtomicU64,
    skipped: AtomicU64,
    in_flight: AtomicBool,
}

/// Point-in-time view of one task's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub name: String,
    pub interval_ms: u64,
    pub invocations: u64,
    pub skipped_ticks: u64,
    pub in_flight: bool,
}

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks that finished within the grace period
    pub drained: usize,
    /// Tasks still running when the grace period expired
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

struct Registration {
    name: String,
    interval: Duration,
    counters: Arc<TaskCounters>,
    handle: JoinHandle<()>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Runs independently-configured periodic tasks.
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<Registration>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Register and start a task. The first tick fires immediately.
    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<()> {
        let name = name.into();
        if period.is_zero() {
            return Err(Error::Config(format!(
                "Task '{}' needs a positive interval",
                name
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(Error::InvalidState {
                expected: "running scheduler".to_string(),
                actual: "cancelled".to_string(),
            });
        }

        let counters = Arc::new(TaskCounters::default());
        let handle = tokio::spawn(drive(
            name.clone(),
            period,
            task,
            self.cancel.child_token(),
            Arc::clone(&counters),
        ));

        debug!(task = %name, interval_ms = period.as_millis() as u64, "Task registered");
        self.tasks.push(Registration {
            name,
            interval: period,
            counters,
            handle,
        });
        Ok(())
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of every task's counters.
    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks
            .iter()
            .map(|t| TaskStats {
                name: t.name.clone(),
                interval_ms: t.interval.as_millis() as u64,
                invocations: t.counters.invocations.load(Ordering::Relaxed),
                skipped_ticks: t.counters.skipped.load(Ordering::Relaxed),
                in_flight: t.counters.in_flight.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Stop issuing ticks and wait up to `grace` for in-flight invocations.
    ///
    /// Invocations still running when the grace period expires are aborted
    /// and reported as abandoned.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.tasks);
        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let aborts: Vec<_> = tasks.iter().map(|t| t.handle.abort_handle()).collect();
        let handles: Vec<_> = tasks.into_iter().map(|t| t.handle).collect();

        if let Ok(results) = tokio::time::timeout(grace, join_all(handles)).await {
            for (name, result) in names.iter().zip(results) {
                if let Err(e) = result {
                    warn!(task = %name, error = %e, "Task ended abnormally during drain");
                }
            }
            return ShutdownReport {
                drained: names.len(),
                abandoned: Vec::new(),
            };
        }

        let mut report = ShutdownReport::default();
        for (name, abort) in names.into_iter().zip(aborts) {
            if abort.is_finished() {
                report.drained += 1;
            } else {
                abort.abort();
                report.abandoned.push(name);
            }
        }
        warn!(
            grace_ms = grace.as_millis() as u64,
            abandoned = ?report.abandoned,
            "Grace period expired, abandoning in-flight tasks"
        );
        report
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Dropped without shutdown: stop ticking, let in-flight work finish.
        self.cancel.cancel();
    }
}

async fn drive(
    name: String,
    period: Duration,
    task: Arc<dyn PeriodicTask>,
    cancel: CancellationToken,
    counters: Arc<TaskCounters>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let scheduled: Instant = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            at = ticker.tick() => at,
        };
        if cancel.is_cancelled() {
            break;
        }

        counters.in_flight.store(true, Ordering::Relaxed);
        counters.invocations.fetch_add(1, Ordering::Relaxed);
        task.tick().await;
        counters.in_flight.store(false, Ordering::Relaxed);

        // Ticks that fell due while this invocation ran are dropped; the
        // next one stays aligned to the fixed schedule.
        let behind = scheduled.elapsed();
        if behind >= period {
            let (missed, next) = realign(scheduled, period, behind);
            counters.skipped.fetch_add(missed, Ordering::Relaxed);
            ticker.reset_at(next);
            debug!(
                task = %name,
                elapsed_ms = behind.as_millis() as u64,
                missed,
                "Invocation overran its interval, skipping ticks"
            );
        }
    }

    info!(task = %name, "Task stopped");
}

/// Ticks missed by an invocation that ran `behind` past `scheduled`, and the
/// next deadline on the original grid. Saturates on absurd overruns.
fn realign(scheduled: Instant, period: Duration, behind: Duration) -> (u64, Instant) {
    let missed = u64::try_from(behind.as_nanos() / period.as_nanos()).unwrap_or(u64::MAX);
    let steps = u32::try_from(missed.saturating_add(1)).unwrap_or(u32::MAX);
    let next = period
        .checked_mul(steps)
        .and_then(|offset| scheduled.checked_add(offset))
        .unwrap_or_else(|| Instant::now() + period);
    (missed, next)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct Counting {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        work: Duration,
    }

    impl Counting {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                work,
            })
        }
    }

    #[async_trait]
    impl PeriodicTask for Counting {
        async fn tick(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.work.is_zero() {
                sleep(self.work).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_interval() {
        let task = Counting::new(Duration::ZERO);
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn("counting", Duration::from_millis(100), task.clone())
            .unwrap();

        sleep(Duration::from_millis(450)).await;
        let report = scheduler.shutdown(Duration::from_secs(1)).await;

        // t = 0, 100, 200, 300, 400
        assert_eq!(task.runs.load(Ordering::SeqCst), 5);
        assert!(report.is_clean());
        assert_eq!(report.drained, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_skips_instead_of_overlapping() {
        let task = Counting::new(Duration::from_millis(250));
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn("slow", Duration::from_millis(100), task.clone())
            .unwrap();

        sleep(Duration::from_millis(1000)).await;
        let stats = scheduler.stats();
        scheduler.shutdown(Duration::from_secs(1)).await;

        // Runs start at 0, 300, 600, 900; the ticks in between are skipped.
        assert_eq!(task.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(stats[0].invocations, 4);
        assert_eq!(stats[0].skipped_ticks, 6);
        assert_eq!(task.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_do_not_delay_each_other() {
        let slow = Counting::new(Duration::from_millis(900));
        let fast = Counting::new(Duration::ZERO);
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn("slow", Duration::from_millis(1000), slow.clone())
            .unwrap();
        scheduler
            .spawn("fast", Duration::from_millis(100), fast.clone())
            .unwrap();

        sleep(Duration::from_millis(950)).await;
        scheduler.shutdown(Duration::from_secs(1)).await;

        assert_eq!(fast.runs.load(Ordering::SeqCst), 10);
        assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_shutdown() {
        let task = Counting::new(Duration::ZERO);
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn("counting", Duration::from_millis(100), task.clone())
            .unwrap();

        sleep(Duration::from_millis(250)).await;
        scheduler.shutdown(Duration::from_secs(1)).await;
        let after_stop = task.runs.load(Ordering::SeqCst);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_abandons_in_flight() {
        let task = Counting::new(Duration::from_secs(10));
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn("stuck", Duration::from_millis(100), task.clone())
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        let report = scheduler.shutdown(Duration::from_millis(200)).await;

        assert_eq!(report.abandoned, vec!["stuck".to_string()]);
        assert_eq!(report.drained, 0);
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let mut scheduler = Scheduler::new();
        let result = scheduler.spawn("bad", Duration::ZERO, Counting::new(Duration::ZERO));
        assert_matches!(result, Err(Error::Config(_)));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_realign_stays_on_grid() {
        let start = Instant::now();
        let period = Duration::from_millis(100);

        let (missed, next) = realign(start, period, Duration::from_millis(250));
        assert_eq!(missed, 2);
        assert_eq!(next, start + Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_realign_saturates_on_huge_overrun() {
        let start = Instant::now();
        let period = Duration::from_nanos(1);

        let (missed, next) = realign(start, period, Duration::from_secs(u64::MAX / 2));
        assert_eq!(missed, u64::MAX);
        assert!(next > start);
    }
}
