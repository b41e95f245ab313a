// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-size thread pool with individually awaitable jobs.
//!
//! Work is submitted as a closure and handed to exactly one worker through an
//! internally synchronized FIFO. A token channel plays the role of a counting
//! semaphore: one token is posted per enqueued job, and workers block on the
//! token channel before popping the queue. Shutdown is cooperative: the pool
//! appends one sentinel job per worker and each worker exits its loop when it
//! pops a sentinel, so every real job enqueued before shutdown runs first.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::trace;

use crate::queue::SyncQueue;

/// Worker-local context handed to every job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Index of the worker executing the job, in `0..worker_count`.
    pub worker_index: usize,
}

type JobFn<R> = Box<dyn FnOnce(WorkerInfo) -> R + Send + 'static>;

enum Job<R> {
    Work { func: JobFn<R>, done: Sender<R> },
    Shutdown { done: Sender<()> },
}

impl<R> Debug for Job<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Work { .. } => "Job::Work",
            Self::Shutdown { .. } => "Job::Shutdown",
        })
    }
}

/// Single-use receipt for a submitted job. Must be waited on to observe the
/// job's result; consuming it is the only way to do so.
#[derive(Debug)]
pub struct JobHandle<R> {
    done: Receiver<R>,
}

impl<R> JobHandle<R> {
    /// Blocks until the job has run and returns its result.
    pub fn wait(self) -> Result<R, WaitError> {
        self.done.recv().map_err(|_| WaitError::Disconnected)
    }
}

/// Waiting on a job whose worker died before posting a result.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The completion channel closed without a value.
    Disconnected,
}

impl Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("job completion signal was never posted")
    }
}

impl std::error::Error for WaitError {}

/// Failure to bring the pool up.
#[derive(Debug)]
pub enum SpawnError {
    /// The OS refused to create a worker thread.
    ThreadCreate(std::io::Error),
}

impl Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadCreate(err) => write!(f, "could not create worker thread: {err}"),
        }
    }
}

impl std::error::Error for SpawnError {}

struct PoolShared<R> {
    jobs: SyncQueue<Job<R>>,
    tokens_tx: Sender<()>,
    tokens_rx: Receiver<()>,
}

impl<R> PoolShared<R> {
    fn enqueue(&self, job: Job<R>) {
        self.jobs.push(job);
        // The receiver half lives in this same struct, so posting the token
        // cannot fail while any worker is alive.
        let _ = self.tokens_tx.send(());
    }
}

/// Pool of `worker_count` OS threads consuming jobs in FIFO order.
pub struct ThreadPool<R> {
    workers: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared<R>>,
}

impl<R> Debug for ThreadPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("worker_count", &self.workers.len())
            .field("queued_jobs", &self.shared.jobs.len())
            .finish()
    }
}

impl<R> ThreadPool<R>
where
    R: Send + 'static,
{
    /// Creates a pool with an explicit worker count.
    pub fn new(worker_count: usize) -> Result<Self, SpawnError> {
        let (tokens_tx, tokens_rx) = unbounded();
        let shared = Arc::new(PoolShared {
            jobs: SyncQueue::new(),
            tokens_tx,
            tokens_rx,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("worker {worker_index}"))
                .spawn(move || worker_loop(&shared, WorkerInfo { worker_index }))
                .map_err(SpawnError::ThreadCreate)?;
            workers.push(handle);
        }

        Ok(Self { workers, shared })
    }

    /// Creates a pool sized for the running system: active cores plus one,
    /// the extra thread compensating for workers parked in blocking I/O.
    pub fn new_dynamic() -> Result<Self, SpawnError> {
        Self::new(num_cpus::get() + 1)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues `func` and returns the handle its result must be claimed
    /// through. Jobs run in submission order.
    pub fn submit<F>(&self, func: F) -> JobHandle<R>
    where
        F: FnOnce(WorkerInfo) -> R + Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        self.shared.enqueue(Job::Work {
            func: Box::new(func),
            done: done_tx,
        });
        JobHandle { done: done_rx }
    }

    /// Tears the pool down: appends one sentinel job per worker, waits for
    /// each to be claimed, then joins every worker thread.
    ///
    /// All jobs submitted before this call run to completion first, because
    /// sentinels are plain tail entries of the same FIFO. Callers are still
    /// expected to wait on their own handles before shutting down.
    pub fn shutdown(self) {
        for _ in 0..self.workers.len() {
            let (ack_tx, ack_rx) = bounded(1);
            self.shared.enqueue(Job::Shutdown { done: ack_tx });
            // A worker that picks up the sentinel acknowledges before it
            // exits; if every worker already died the recv fails and joining
            // below surfaces the panic.
            let _ = ack_rx.recv();
        }

        for worker in self.workers {
            if let Err(panic) = worker.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

fn worker_loop<R>(shared: &PoolShared<R>, info: WorkerInfo) {
    loop {
        if shared.tokens_rx.recv().is_err() {
            // Pool dropped without shutdown; nothing more will arrive.
            return;
        }

        assert!(
            !shared.jobs.is_empty(),
            "job token posted without a matching queue entry"
        );

        match shared.jobs.pop() {
            Job::Work { func, done } => {
                let result = func(info);
                // The handle may have been dropped without a wait; the result
                // is discarded in that case, never re-posted.
                let _ = done.send(result);
            }
            Job::Shutdown { done } => {
                trace!("worker {} leaving on shutdown job", info.worker_index);
                let _ = done.send(());
                return;
            }
        }
    }
}
