// Scheduler Engine
// Ticker loop, per-task running-set, and the execution pipeline:
// invoke -> record -> bookkeep -> reschedule -> notify.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::executor::Executor;
use crate::schedule;
use crate::store::Store;
use crate::task::{ExecutionLog, SharedTask, Task, TaskKind, TaskStatus};

/// Fixed scheduling scan period.
pub const TICK_PERIOD: Duration = Duration::from_secs(5);

/// The scheduling heart: one background worker scans the store every tick,
/// seeds newly created tasks, and spawns a concurrent execution for each due
/// task that is not already running.
#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    running: Arc<Mutex<HashSet<String>>>,
    cancel: Arc<Mutex<CancellationToken>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Engine {
    pub fn new(store: Arc<Store>, executor: Arc<dyn Executor>) -> Self {
        Self::with_clock(store, executor, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<Store>,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Launch the background ticker worker. Non-blocking; calling again while
    /// the worker is alive is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                warn!("scheduler engine already running");
                return;
            }
        }
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        let engine = self.clone();
        *worker = Some(tokio::spawn(engine.run_ticker(token)));
        info!("scheduler engine started (tick every {TICK_PERIOD:?})");
    }

    /// Cancel the ticker and wait for the worker to observe it. Executions
    /// already in flight are not cancelled.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("scheduler worker join failed: {e}");
            }
        }
        info!("scheduler engine stopped");
    }

    /// Execute a task immediately, outside its schedule, subject to the same
    /// one-at-a-time claim. Silently a no-op when already executing.
    pub fn run_task_now(&self, task: SharedTask) {
        self.spawn_execution(task);
    }

    /// Whether an execution for this task id is currently in flight.
    pub fn is_running(&self, id: &str) -> bool {
        self.running.lock().contains(id)
    }

    async fn run_ticker(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    /// One scheduling pass over the task set.
    fn tick(&self) {
        let now = self.clock.now();
        for shared in self.store.get_tasks() {
            let (id, status, next_run_at) = {
                let task = shared.read();
                (task.id.clone(), task.status, task.next_run_at)
            };
            if status != TaskStatus::Active {
                continue;
            }
            match next_run_at {
                // Newly scheduled task: seed next_run_at now, fire on a
                // later tick.
                None => {
                    if let Err(e) = self.compute_next_run(&shared, false) {
                        warn!("failed to persist schedule for task {id}: {e}");
                    }
                }
                Some(due) if now >= due => self.spawn_execution(shared),
                Some(_) => {}
            }
        }
    }

    /// Atomic insert-if-absent on the running-set. The returned claim clears
    /// the slot on drop, so every exit path of an execution releases it.
    fn claim(&self, id: &str) -> Option<RunClaim> {
        let mut running = self.running.lock();
        if !running.insert(id.to_string()) {
            return None;
        }
        Some(RunClaim {
            running: self.running.clone(),
            id: id.to_string(),
        })
    }

    fn spawn_execution(&self, shared: SharedTask) {
        let id = shared.read().id.clone();
        let Some(claim) = self.claim(&id) else {
            debug!("task {id} is still running, skipping");
            return;
        };
        let engine = self.clone();
        tokio::spawn(async move {
            let _claim = claim;
            engine.execute_task(shared).await;
        });
    }

    async fn execute_task(&self, shared: SharedTask) {
        let snapshot = shared.read().clone();
        let started = self.clock.now();
        let result = self.executor.execute(&snapshot).await;
        let finished = self.clock.now();
        let duration_ms = (finished - started).num_milliseconds().max(0) as u64;

        let (success, output) = match result {
            Ok(output) => (true, output),
            Err(e) => (false, format!("Error: {e}")),
        };
        if success {
            debug!(
                "task {} ({}) completed in {duration_ms}ms",
                snapshot.id, snapshot.name
            );
        } else {
            warn!(
                "task {} ({}) failed after {duration_ms}ms: {output}",
                snapshot.id, snapshot.name
            );
        }

        let entry = ExecutionLog::record(&snapshot, started, duration_ms, success, &output);
        if let Err(e) = self.store.append_log(entry) {
            error!("failed to persist execution log for task {}: {e}", snapshot.id);
        }

        {
            let mut task = shared.write();
            task.last_run_at = Some(finished);
            if success {
                task.failure_count = 0;
            } else {
                task.failure_count += 1;
            }
            // fixed_time means "fire once, then done", success or not.
            if task.kind == TaskKind::FixedTime {
                task.status = TaskStatus::Finished;
                task.next_run_at = None;
            }
        }
        // The task guard must be released before the reschedule persists.
        if let Err(e) = self.compute_next_run(&shared, true) {
            error!("failed to persist reschedule for task {}: {e}", snapshot.id);
        }
    }

    /// Recompute `next_run_at` for the task's discipline and persist.
    ///
    /// Misconfigured tasks (unparseable interval, no valid daily point,
    /// unknown type) are paused rather than re-diagnosed every tick.
    /// Persists when anything changed, or unconditionally when
    /// `force_persist` is set.
    fn compute_next_run(&self, shared: &SharedTask, force_persist: bool) -> Result<()> {
        let base = self.clock.now();
        let changed = {
            let mut task = shared.write();
            match task.kind {
                TaskKind::Interval => match schedule::parse_interval(&task.interval) {
                    Some(interval) => {
                        let next = schedule::next_interval_run(interval, task.last_run_at, base);
                        set_next_run(&mut task, Some(next))
                    }
                    None => {
                        warn!(
                            "task {} has unparseable interval `{}`, pausing",
                            task.id, task.interval
                        );
                        pause(&mut task)
                    }
                },
                TaskKind::FixedTime => match task.fixed_time {
                    Some(at) if at > base => set_next_run(&mut task, Some(at)),
                    // One-shot whose wall clock has already passed: terminal.
                    _ => finish(&mut task),
                },
                TaskKind::Daily | TaskKind::SystemReport => {
                    let local = base.with_timezone(&chrono::Local);
                    match schedule::next_daily_run(&task.daily_time, &local) {
                        Some(next) => {
                            set_next_run(&mut task, Some(next.with_timezone(&Utc)))
                        }
                        None => {
                            warn!(
                                "task {} has no valid time point in `{}`, pausing",
                                task.id, task.daily_time
                            );
                            pause(&mut task)
                        }
                    }
                }
                TaskKind::Unknown => {
                    warn!("task {} has an unknown type, pausing", task.id);
                    pause(&mut task)
                }
            }
        };
        if changed || force_persist {
            self.store.save()?;
        }
        Ok(())
    }
}

fn set_next_run(task: &mut Task, next: Option<DateTime<Utc>>) -> bool {
    if task.next_run_at == next {
        return false;
    }
    task.next_run_at = next;
    true
}

fn pause(task: &mut Task) -> bool {
    let changed = task.status != TaskStatus::Paused || task.next_run_at.is_some();
    task.status = TaskStatus::Paused;
    task.next_run_at = None;
    changed
}

fn finish(task: &mut Task) -> bool {
    let changed = task.status != TaskStatus::Finished || task.next_run_at.is_some();
    task.status = TaskStatus::Finished;
    task.next_run_at = None;
    changed
}

/// Removes the claimed id from the running-set when the execution ends,
/// including on panic unwind.
struct RunClaim {
    running: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
