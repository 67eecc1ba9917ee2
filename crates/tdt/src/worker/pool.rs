use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Work executed by pool workers.
pub trait JobHandler<J>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn handle(&self, worker_id: usize, job: J) -> Self::Output;

    /// Result for a job taken off the queue after shutdown was requested.
    fn decline(&self, job: J) -> Self::Output;
}

/// Fixed set of worker threads draining a bounded job queue.
///
/// Once the shutdown flag is set, queued jobs are declined instead of run; jobs
/// already running finish normally. Every submitted job yields exactly one result.
pub struct WorkerPool<J, R> {
    job_sender: Sender<J>,
    result_receiver: Receiver<R>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    pub fn new<H>(handler: Arc<H>, worker_count: usize, shutdown: Arc<AtomicBool>) -> Self
    where
        H: JobHandler<J, Output = R>,
    {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<J>(worker_count * 2);
        // Results are unbounded so a worker never blocks while the submitter
        // is still feeding the job queue.
        let (result_sender, result_receiver) = unbounded::<R>();

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_handler);
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, job: J) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ShuttingDown);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn recv_result(&self) -> Option<R> {
        self.result_receiver.recv().ok()
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

/// Counting gate shared by several pools so their combined concurrency stays
/// within `capacity`. Cloning shares the same slots.
#[derive(Clone)]
pub struct SlotGate {
    slots: Receiver<()>,
    returns: Sender<()>,
}

impl SlotGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (returns, slots) = bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` tokens.
            let _ = returns.send(());
        }
        Self { slots, returns }
    }

    /// Blocks until a slot is free. Returns `None` once `shutdown` is set.
    pub fn acquire(&self, shutdown: &AtomicBool) -> Option<SlotPermit<'_>> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            match self.slots.recv_timeout(POLL_INTERVAL) {
                Ok(()) => return Some(SlotPermit { gate: self }),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Held slot of a [`SlotGate`]; released on drop.
pub struct SlotPermit<'a> {
    gate: &'a SlotGate,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        let _ = self.gate.returns.send(());
    }
}

fn run_worker<J, H>(
    worker_id: usize,
    job_receiver: Receiver<J>,
    result_sender: Sender<H::Output>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<H>,
) where
    H: JobHandler<J>,
{
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                let result = if shutdown.load(Ordering::Relaxed) {
                    debug!("Worker {} declining job after shutdown", worker_id);
                    handler.decline(job)
                } else {
                    handler.handle(worker_id, job)
                };

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
