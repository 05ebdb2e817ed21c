//! Executors running transport loops and protocols.
//!
//! Receive and accept loops block for their whole lifetime, so each gets a
//! [`DedicatedThreadExecutor`] thread. Protocols are short-lived and run on
//! a [`BoundedThreadPool`], which rejects work instead of queueing without
//! limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::TransportError;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    /// Submit a task. Rejected tasks are returned as an error and dropped.
    fn execute(&self, task: Task) -> Result<(), TransportError>;
}

/// Runs every task on a new named OS thread.
#[derive(Debug)]
pub struct DedicatedThreadExecutor {
    name: String,
    counter: AtomicUsize,
}

impl DedicatedThreadExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter: AtomicUsize::new(0),
        }
    }
}

impl Executor for DedicatedThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), TransportError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.name, n);
        trace!("Spawning thread {}", name);
        thread::Builder::new()
            .name(name)
            .spawn(task)
            .map(|_| ())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

/// Fixed number of workers draining a bounded queue.
pub struct BoundedThreadPool {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BoundedThreadPool {
    pub fn new(name: impl Into<String>, threads: usize, capacity: usize) -> Result<Self, TransportError> {
        let name = name.into();
        let (sender, receiver) = channel::bounded::<Task>(capacity);
        let mut workers = Vec::with_capacity(threads);

        for i in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })
                .map_err(|e| TransportError::Rejected(e.to_string()))?;
            workers.push(handle);
        }
        debug!("Started pool {} with {} workers", name, threads);

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Stop accepting tasks and wait for queued tasks to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Worker of pool {} panicked", self.name);
            }
        }
        debug!("Pool {} shut down", self.name);
    }
}

impl Executor for BoundedThreadPool {
    fn execute(&self, task: Task) -> Result<(), TransportError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(TransportError::Rejected(format!("pool {} is shut down", self.name)));
        };
        sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Rejected(format!("pool {} queue is full", self.name)),
            TrySendError::Disconnected(_) => {
                TransportError::Rejected(format!("pool {} is shut down", self.name))
            }
        })
    }
}

impl Drop for BoundedThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BoundedThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedThreadPool")
            .field("name", &self.name)
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}
