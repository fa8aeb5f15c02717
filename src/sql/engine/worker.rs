use super::store::Store;
use crate::error::{Error, Result};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use rusqlite::InterruptHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A job for the worker thread.
struct Job {
    id: u64,
    cancelled: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    run: Box<dyn FnOnce(&Store) + Send>,
}

/// Runs store calls on a dedicated thread, in strict submission order, and
/// hands out completion handles for them. This gives callers a non-blocking
/// contract over the store's synchronous interface.
pub struct Worker {
    tx: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
    interrupt: Arc<InterruptHandle>,
    /// The id of the running job, or 0 when idle.
    current: Arc<Mutex<u64>>,
    next_id: AtomicU64,
}

impl Worker {
    /// Starts a worker thread owning the store.
    pub fn new(store: Store) -> Self {
        let (tx, rx) = channel::unbounded::<Job>();
        let interrupt = store.interrupt_handle();
        let current = Arc::new(Mutex::new(0));
        let thread = {
            let current = current.clone();
            std::thread::spawn(move || Self::serve(store, rx, current))
        };
        Self { tx: Some(tx), thread: Some(thread), interrupt, current, next_id: AtomicU64::new(1) }
    }

    fn serve(store: Store, rx: Receiver<Job>, current: Arc<Mutex<u64>>) {
        for job in rx {
            // The cancellation check and the current job id are updated under
            // the same lock cancel() takes, so a cancelled job is either
            // skipped or interrupted.
            let skip = match current.lock() {
                Ok(mut current) if !job.cancelled.load(Ordering::SeqCst) => {
                    *current = job.id;
                    job.started.store(true, Ordering::SeqCst);
                    false
                }
                Ok(_) => true,
                Err(err) => {
                    warn!("Worker state poisoned: {err}");
                    let cancelled = job.cancelled.load(Ordering::SeqCst);
                    job.started.store(!cancelled, Ordering::SeqCst);
                    cancelled
                }
            };
            // Dropping a skipped job disconnects its handle.
            if skip {
                debug!("Skipping cancelled job {}", job.id);
                continue;
            }
            (job.run)(&store);
            if let Ok(mut current) = current.lock() {
                *current = 0;
            }
        }
        debug!("Worker stopped");
    }

    /// Submits a call to run against the store, returning a handle to its
    /// result.
    pub fn submit<T, F>(&self, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = channel::bounded(1);
        let job = Job {
            id,
            cancelled: cancelled.clone(),
            started: started.clone(),
            run: Box::new(move |store| {
                // The handle may have been dropped, discarding the result.
                let _ = result_tx.send(f(store));
            }),
        };
        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                warn!("Worker is gone, job {id} dropped");
            }
        }
        Pending {
            id,
            rx: result_rx,
            cancelled,
            started,
            current: self.current.clone(),
            interrupt: self.interrupt.clone(),
        }
    }
}

impl Drop for Worker {
    /// Stops the worker once queued jobs have run.
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

/// A handle to the result of a submitted call.
pub struct Pending<T> {
    id: u64,
    rx: Receiver<Result<T>>,
    cancelled: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    current: Arc<Mutex<u64>>,
    interrupt: Arc<InterruptHandle>,
}

impl<T> Pending<T> {
    /// Blocks until the call completes. A cancelled call always yields
    /// Error::Cancelled, never a partial or late result.
    pub fn wait(self) -> Result<T> {
        let result = self.rx.recv()?;
        self.finish(result)
    }

    /// Blocks until the call completes or the timeout elapses. On timeout,
    /// the call is cancelled. Error::Timeout means the call had no effect: it
    /// was skipped, or its statement was interrupted and rolled back. A call
    /// that completed regardless returns its result.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => self.finish(result),
            Err(RecvTimeoutError::Timeout) => {
                if !self.abort() {
                    return Err(Error::Timeout);
                }
                // The interrupted call finishes promptly.
                match self.rx.recv() {
                    Ok(Err(Error::Cancelled)) | Err(_) => Err(Error::Timeout),
                    Ok(result) => result,
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Cancelled),
        }
    }

    /// Cancels the call. A queued call is skipped, and a running one is
    /// interrupted.
    pub fn cancel(&self) {
        self.abort();
    }

    /// Cancels the call, returning whether it had already started.
    fn abort(&self) -> bool {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            warn!("Cancelling job {}", self.id);
        }
        // Holding the lock keeps the worker from starting the job, or moving
        // on to the next one, while the interrupt is raised.
        if let Ok(current) = self.current.lock() {
            if *current == self.id {
                self.interrupt.interrupt();
            }
        }
        self.started.load(Ordering::SeqCst)
    }

    fn finish(&self, result: Result<T>) -> Result<T> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        result
    }
}
