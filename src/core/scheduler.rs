//! Deferred, coalesced version-control commits.
//!
//! Saving a record schedules a commit task for the record's category
//! instead of committing right away. Tasks are keyed by [`TaskKind`]:
//! while one is pending, further requests of the same kind are absorbed
//! into it, except that a request with a zero wait escalates the pending
//! task to run immediately.
//!
//! A single worker thread sleeps until the earliest deadline or until it
//! is notified. Running a task takes the ledger lock so a commit never
//! interleaves with a half-done mutation. [`CommitScheduler::shutdown`]
//! skips every remaining wait and runs all pending tasks before returning.

use crate::core::broker::Broker;
use crate::core::external_action::Vcs;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    CommitDrinkers,
    CommitAdminCash,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::CommitDrinkers => "commit-drinkers",
            TaskKind::CommitAdminCash => "commit-admin-cash",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            TaskKind::CommitDrinkers => "drinkers update",
            TaskKind::CommitAdminCash => "admin cash update",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitTask {
    pub kind: TaskKind,
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub wait_time: Duration,
    pub created_at: Instant,
}

impl CommitTask {
    pub fn new(kind: TaskKind, paths: Vec<PathBuf>, wait_time: Duration) -> Self {
        Self {
            kind,
            paths,
            message: kind.message().to_string(),
            wait_time,
            created_at: Instant::now(),
        }
    }

    pub fn immediate(kind: TaskKind, paths: Vec<PathBuf>) -> Self {
        Self::new(kind, paths, Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No task of this kind was pending; a new one was queued.
    Queued,
    /// Absorbed into the pending task of the same kind.
    Coalesced,
    /// The pending task of the same kind now runs without further delay.
    Escalated,
    /// The scheduler was already shut down; the task ran inline.
    RanInline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub executed: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub escalated: u64,
}

struct Pending {
    task: CommitTask,
    due: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<TaskKind, Pending>,
    running: Option<TaskKind>,
    shutting_down: bool,
    stopped: bool,
    stats: SchedulerStats,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    broker: Arc<Broker>,
    vcs: Arc<dyn Vcs>,
}

pub struct CommitScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommitScheduler {
    /// Start the worker thread.
    pub fn start(broker: Arc<Broker>, vcs: Arc<dyn Vcs>) -> Result<Self, std::io::Error> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            broker,
            vcs,
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("drinkledger-commit".to_string())
            .spawn(move || worker_shared.run_worker())?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue, absorb or escalate a commit. Never blocks on the ledger lock.
    pub fn schedule(&self, task: CommitTask) -> ScheduleOutcome {
        let mut st = self.shared.state.lock();
        if st.stopped {
            drop(st);
            tracing::warn!(kind = task.kind.as_str(), "scheduler stopped, committing inline");
            self.shared.execute(&task);
            return ScheduleOutcome::RanInline;
        }

        let kind = task.kind;
        let outcome = match st.pending.get_mut(&kind) {
            Some(existing) => {
                if task.wait_time.is_zero() && !existing.task.wait_time.is_zero() {
                    existing.task.wait_time = Duration::ZERO;
                    existing.due = Instant::now();
                    ScheduleOutcome::Escalated
                } else {
                    ScheduleOutcome::Coalesced
                }
            }
            None => {
                let due = task.created_at + task.wait_time;
                st.pending.insert(kind, Pending { task, due });
                ScheduleOutcome::Queued
            }
        };
        match outcome {
            ScheduleOutcome::Escalated => st.stats.escalated += 1,
            ScheduleOutcome::Coalesced => st.stats.coalesced += 1,
            _ => {}
        }
        drop(st);

        if outcome != ScheduleOutcome::Coalesced {
            self.shared.wake.notify_all();
        }
        tracing::debug!(kind = kind.as_str(), ?outcome, "commit scheduled");
        outcome
    }

    /// Make a pending task of `kind` run now. Returns false if none is pending.
    pub fn escalate(&self, kind: TaskKind) -> bool {
        let mut st = self.shared.state.lock();
        let Some(existing) = st.pending.get_mut(&kind) else {
            return false;
        };
        existing.task.wait_time = Duration::ZERO;
        existing.due = Instant::now();
        st.stats.escalated += 1;
        drop(st);
        self.shared.wake.notify_all();
        true
    }

    /// Pending kinds with their remaining delay.
    pub fn pending(&self) -> Vec<(TaskKind, Duration)> {
        let now = Instant::now();
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .map(|(k, p)| (*k, p.due.saturating_duration_since(now)))
            .collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats
    }

    /// Block until nothing is pending or running, or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        loop {
            if st.pending.is_empty() && st.running.is_none() {
                return true;
            }
            if self.shared.idle.wait_until(&mut st, deadline).timed_out() {
                return st.pending.is_empty() && st.running.is_none();
            }
        }
    }

    /// Run every pending task now and stop the worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.state.lock();
            st.shutting_down = true;
            if !st.pending.is_empty() {
                tracing::info!(pending = st.pending.len(), "draining pending commits");
            }
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("commit worker panicked");
                self.shared.state.lock().stopped = true;
            }
        }
    }
}

impl Drop for CommitScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run_worker(&self) {
        let mut st = self.state.lock();
        loop {
            let next = st
                .pending
                .iter()
                .min_by_key(|(_, p)| p.due)
                .map(|(k, p)| (*k, p.due));
            match next {
                None => {
                    self.idle.notify_all();
                    if st.shutting_down {
                        break;
                    }
                    self.wake.wait(&mut st);
                }
                Some((kind, due)) if st.shutting_down || due <= Instant::now() => {
                    let Some(pending) = st.pending.remove(&kind) else {
                        continue;
                    };
                    st.running = Some(kind);
                    let ok = MutexGuard::unlocked(&mut st, || self.execute(&pending.task));
                    st.running = None;
                    if ok {
                        st.stats.executed += 1;
                    } else {
                        st.stats.failed += 1;
                    }
                }
                Some((_, due)) => {
                    let _ = self.wake.wait_until(&mut st, due);
                }
            }
        }
        st.stopped = true;
        drop(st);
        self.idle.notify_all();
    }

    /// Commit under the ledger lock. Failures are logged, never retried.
    fn execute(&self, task: &CommitTask) -> bool {
        let waited = task.created_at.elapsed();
        let result = self
            .broker
            .with_lock(task.kind.as_str(), || self.vcs.commit(&task.paths, &task.message));
        match result {
            Ok(()) => {
                tracing::info!(
                    kind = task.kind.as_str(),
                    waited_ms = waited.as_millis() as u64,
                    "committed"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    kind = task.kind.as_str(),
                    error = %e,
                    "commit failed; changes stay local until the next commit"
                );
                false
            }
        }
    }
}
