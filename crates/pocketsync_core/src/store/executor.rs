//! Single-writer store executor.
//!
//! A store handle is not safe for concurrent mutation from multiple
//! threads. Instead of confining the handle to the thread that created it,
//! every store gets a dedicated executor thread that owns the handle
//! outright; operations are submitted as jobs and awaited synchronously by
//! the caller. One executor per store instance serializes all access.

use crate::error::{CoreError, CoreResult};
use std::sync::mpsc;
use std::thread;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Owns a store instance on a dedicated thread and serializes all
/// operations against it.
pub struct StoreExecutor<S: Send + 'static> {
    sender: Option<mpsc::Sender<Job<S>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<S: Send + 'static> StoreExecutor<S> {
    /// Spawns the executor thread and moves the store into it.
    pub fn new(store: S) -> Self {
        let (sender, receiver) = mpsc::channel::<Job<S>>();
        let worker = thread::spawn(move || {
            let mut store = store;
            while let Ok(job) = receiver.recv() {
                job(&mut store);
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Runs an operation against the store and waits for its result.
    ///
    /// Jobs run in submission order; a job observes every effect of the
    /// jobs submitted before it.
    pub fn run<R, F>(&self, operation: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(CoreError::StoreClosed)?;
        let (reply, result) = mpsc::sync_channel(1);
        let job: Job<S> = Box::new(move |store| {
            let _ = reply.send(operation(store));
        });
        sender.send(job).map_err(|_| CoreError::StoreClosed)?;
        result.recv().map_err(|_| CoreError::StoreClosed)
    }
}

impl<S: Send + 'static> Drop for StoreExecutor<S> {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<S: Send + 'static> std::fmt::Debug for StoreExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreExecutor")
            .field("closed", &self.sender.is_none())
            .finish()
    }
}
