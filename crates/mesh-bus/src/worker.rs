//! # Serial Worker
//!
//! A task that exclusively owns a piece of state and applies closures to it
//! one at a time, in the order they were enqueued. Nothing else ever holds a
//! reference to the state, so it needs no lock.
//!
//! - [`WorkerHandle::submit`] enqueues and returns immediately. Safe to call
//!   from transport callbacks and from closures already running on a worker.
//! - [`WorkerHandle::call`] enqueues and waits for the closure's result on a
//!   one-shot channel. Never call it from a closure running on the same
//!   worker; that closure would wait on itself.

use crate::queue::Queue;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors from worker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker has been shut down.
    #[error("Worker {0} is stopped")]
    Stopped(&'static str),

    /// The closure panicked or was discarded before producing a result.
    #[error("Task on worker {0} was abandoned")]
    Abandoned(&'static str),
}

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Job<S> {
    Run(Task<S>),
    Shutdown,
}

/// Cloneable submitter for a [`Worker`].
pub struct WorkerHandle<S> {
    name: &'static str,
    jobs: Arc<Queue<Job<S>>>,
    closed: Arc<AtomicBool>,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            jobs: Arc::clone(&self.jobs),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<S: Send + 'static> WorkerHandle<S> {
    /// Enqueue a closure without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Stopped`] once shutdown has begun.
    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.is_closed() {
            return Err(WorkerError::Stopped(self.name));
        }
        self.jobs.enqueue(Job::Run(Box::new(task)));
        Ok(())
    }

    /// Enqueue a closure and wait until the worker has run it.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is stopped or the closure never
    /// completes (it panicked or was discarded at shutdown).
    pub async fn call<F, R>(&self, task: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |state| {
            // The caller may have given up waiting; nothing to do then.
            let _ = tx.send(task(state));
        })?;
        rx.await.map_err(|_| WorkerError::Abandoned(self.name))
    }

    /// Check whether shutdown has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of closures waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.jobs.enqueue(Job::Shutdown);
        true
    }
}

/// A running serial worker.
///
/// Dropping the worker requests shutdown; use [`Worker::shutdown`] to also
/// wait for it and recover the state.
pub struct Worker<S> {
    handle: WorkerHandle<S>,
    join: Mutex<Option<JoinHandle<S>>>,
}

impl<S: Send + 'static> Worker<S> {
    /// Spawn a worker owning `state` on the current tokio runtime.
    #[must_use]
    pub fn spawn(name: &'static str, state: S) -> Self {
        let jobs: Arc<Queue<Job<S>>> = Arc::new(Queue::new());
        let join = tokio::spawn(run(name, Arc::clone(&jobs), state));
        debug!(worker = name, "Worker started");

        Self {
            handle: WorkerHandle {
                name,
                jobs,
                closed: Arc::new(AtomicBool::new(false)),
            },
            join: Mutex::new(Some(join)),
        }
    }

    /// Get a cloneable submitter.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle<S> {
        self.handle.clone()
    }

    /// Stop accepting work, let already-queued closures run, and wait for the
    /// worker to exit.
    ///
    /// Returns the final state the first time it is called, `None` after.
    pub async fn shutdown(&self) -> Option<S> {
        self.handle.close();
        let join = self.join.lock().take()?;
        match join.await {
            Ok(state) => Some(state),
            Err(e) => {
                error!(worker = self.handle.name, error = %e, "Worker task failed");
                None
            }
        }
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        if !self.handle.closed.swap(true, Ordering::AcqRel) {
            self.handle.jobs.enqueue(Job::Shutdown);
        }
    }
}

async fn run<S>(name: &'static str, jobs: Arc<Queue<Job<S>>>, mut state: S) -> S {
    loop {
        match jobs.dequeue().await {
            Job::Run(task) => {
                if catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
                    error!(worker = name, "Task panicked; worker continues");
                }
            }
            Job::Shutdown => {
                info!(worker = name, "Stopping worker");
                break;
            }
        }
    }

    // Anything that slipped in after the sentinel is discarded, which drops
    // its one-shot sender and releases the waiting caller.
    while let Some(job) = jobs.try_dequeue() {
        drop(job);
    }

    state
}
