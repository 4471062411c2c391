//! # Concurrency
//!
//! A fixed pool of named worker threads fed through a crossbeam channel, and
//! the per-node walker copies used by parallel spawns.
//!
//! Tasks run with a clone of the submitting session, so reports from every
//! worker land in one sequence. A panicking task does not take its worker
//! down; the panic is surfaced to whoever waits on the task.
//!
//! Waiting on a task from inside another pool task can starve the pool when
//! every worker is blocked the same way.

use crate::anchor::Anchor;
use crate::primitives;
use crate::session::Session;
use crate::types::{AnchorId, WaypointError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    sender: Sender<Job>,
    workers: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("queued", &self.sender.len())
            .finish()
    }
}

impl WorkerPool {
    /// Start `workers` threads, clamped to `1..=MAX_WORKER_THREADS`.
    pub fn new(workers: usize) -> Result<Self, WaypointError> {
        let workers = workers.clamp(1, primitives::MAX_WORKER_THREADS);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        for index in 0..workers {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("waypoint-worker-{}", index))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })
                .map_err(|e| WaypointError::WorkerError(e.to_string()))?;
        }
        tracing::debug!(workers, "worker pool started");
        Ok(Self { sender, workers })
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue `task`; the returned handle yields its result.
    pub fn execute<T, F>(&self, task: F) -> Result<TaskHandle<T>, WaypointError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, WaypointError> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string())
            });
            // The waiter may have given up; nothing to deliver to then.
            let _ = tx.send(outcome);
        });
        self.sender
            .send(job)
            .map_err(|_| WaypointError::WorkerError("worker pool is shut down".to_string()))?;
        Ok(TaskHandle { receiver: rx })
    }
}

/// Pending result of a pool task.
pub struct TaskHandle<T> {
    receiver: Receiver<Result<Result<T, WaypointError>, String>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ready", &!self.receiver.is_empty())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes. Task errors pass through unchanged;
    /// panics become `WorkerError`.
    pub fn wait(self) -> Result<T, WaypointError> {
        match self.receiver.recv() {
            Ok(Ok(result)) => result,
            Ok(Err(message)) => {
                tracing::error!(%message, "worker task panicked");
                Err(WaypointError::WorkerError(format!("task panicked: {}", message)))
            }
            Err(_) => Err(WaypointError::WorkerError(
                "task was dropped before completion".to_string(),
            )),
        }
    }
}

// =============================================================================
// WALKER GROUPS
// =============================================================================

/// One fresh copy of a walker per start node.
#[derive(Debug)]
pub struct WalkerGroups {
    nodes: Vec<Anchor>,
    walkers: Mutex<BTreeMap<AnchorId, Anchor>>,
}

impl WalkerGroups {
    /// Copy `walker`'s fields into a new walker anchor for each distinct
    /// node. Copies start with an empty queue and path.
    pub fn create(
        session: &Session,
        walker: &Anchor,
        nodes: &[Anchor],
    ) -> Result<Self, WaypointError> {
        let template = walker.cell()?.archetype().duplicate();
        let mut seen = BTreeSet::new();
        let mut distinct = Vec::new();
        let mut walkers = BTreeMap::new();
        for node in nodes {
            if !seen.insert(node.id()) {
                continue;
            }
            let copy = session.attach_boxed(template.duplicate())?;
            walkers.insert(node.id(), copy);
            distinct.push(node.clone());
        }
        Ok(Self {
            nodes: distinct,
            walkers: Mutex::new(walkers),
        })
    }

    /// Start nodes in first-seen order, without duplicates.
    #[must_use]
    pub fn nodes(&self) -> Vec<Anchor> {
        self.nodes.clone()
    }

    /// Take the walker copy assigned to `node`. Each copy is handed out once.
    pub fn get_walker(&self, node: AnchorId) -> Option<Anchor> {
        self.walkers.lock().remove(&node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
