//! Bounded pool of blocking worker threads.
//!
//! # Responsibilities
//! - Run a fixed number of named worker threads
//! - Hold accepted jobs in a bounded queue until a worker is free
//! - Apply the saturation policy when the queue is full
//! - Survive a panicking job without losing the worker

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::SaturationPolicy;

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A job the pool could not take. Carries the job back to the caller.
#[derive(Debug)]
pub struct Rejected<T>(pub T);

pub struct WorkerPool<T: Send + 'static> {
    sender: Option<SyncSender<T>>,
    workers: Vec<JoinHandle<()>>,
    policy: SaturationPolicy,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `workers` threads, each running `handler` on queued jobs.
    pub fn new<F>(
        workers: usize,
        queue_capacity: usize,
        policy: SaturationPolicy,
        handler: F,
    ) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler: Handler<T> = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("lb-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, handler))?;
            handles.push(handle);
        }

        tracing::info!(workers, queue_capacity, policy = ?policy, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            policy,
        })
    }

    /// Queue a job.
    ///
    /// Under [`SaturationPolicy::Queue`] this blocks while the queue is
    /// full. Under [`SaturationPolicy::Reject`] a full queue hands the job
    /// straight back.
    pub fn submit(&self, job: T) -> Result<(), Rejected<T>> {
        let Some(sender) = &self.sender else {
            return Err(Rejected(job));
        };

        match self.policy {
            SaturationPolicy::Queue => sender.send(job).map_err(|e| Rejected(e.0)),
            SaturationPolicy::Reject => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(job) | TrySendError::Disconnected(job) => Rejected(job),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking jobs, let workers finish everything queued, and join them.
    pub fn shutdown(mut self) {
        self.close();
    }

    /// Stop taking jobs without waiting for the workers. Whatever is queued
    /// or running carries on until it finishes or the process exits.
    pub fn detach(mut self) {
        drop(self.sender.take());
        let detached = self.workers.len();
        self.workers.clear();
        tracing::debug!(workers = detached, "Worker pool detached");
    }

    fn close(&mut self) {
        // Workers exit once the queue is empty and the sender is gone.
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread exited abnormally");
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop<T>(worker_id: usize, receiver: Arc<Mutex<Receiver<T>>>, handler: Handler<T>) {
    tracing::debug!(worker = worker_id, "Worker started");
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        let Ok(job) = job else { break };

        if panic::catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
            tracing::error!(worker = worker_id, "Connection handler panicked");
        }
    }
    tracing::debug!(worker = worker_id, "Worker stopped");
}
