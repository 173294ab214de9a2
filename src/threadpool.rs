//! Fixed-size worker pool over a bounded FIFO request queue.
//!
//! The dispatcher submits `(connection, operation)` pairs; workers pop them
//! in submission order and run them through the dispatch strategy chosen at
//! construction.

use clap::ValueEnum;
use log::{debug, error, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::store::{StoreConn, StorePool};
use crate::sync::Semaphore;

/// Operation requested for a queued connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

/// Who performs the socket I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActorModel {
    /// The dispatcher reads and writes; workers only process.
    Proactor,
    /// Workers perform the tagged read or write themselves.
    Reactor,
}

/// What a worker can do with a queued connection.
pub trait Job: Send + Sync + 'static {
    /// Drains the socket into the read buffer. `false` means tear down.
    fn read_once(&self) -> bool;
    /// Flushes the pending response. `false` means tear down.
    fn write(&self) -> bool;
    /// Parses what was read and prepares the response.
    fn process(&self, store: Option<&StoreConn>) -> bool;
    /// Publishes the outcome of a worker visit to the dispatcher.
    fn complete(&self, teardown: bool);
}

/// A queue entry.
pub struct Task<J> {
    pub job: Arc<J>,
    pub op: Op,
}

/// Bounded FIFO of pending tasks.
pub struct RequestQueue<J> {
    tasks: Mutex<VecDeque<Task<J>>>,
    queue_stat: Semaphore,
    max_requests: usize,
}

impl<J> RequestQueue<J> {
    pub fn new(max_requests: usize) -> Result<Self> {
        if max_requests == 0 {
            return Err(Error::Config("request queue capacity must be positive".into()));
        }
        Ok(Self {
            tasks: Mutex::new(VecDeque::new()),
            queue_stat: Semaphore::new(0)?,
            max_requests,
        })
    }

    /// Appends a task unless the queue is full. Never blocks.
    pub fn push(&self, task: Task<J>) -> bool {
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.len() >= self.max_requests {
                return false;
            }
            tasks.push_back(task);
        }
        if let Err(e) = self.queue_stat.post() {
            error!("Failed to signal queued task: {}", e);
            self.tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_back();
            return false;
        }
        true
    }

    /// Blocks until a task is signalled, then takes the oldest one.
    ///
    /// Returns `None` on a wake-up that finds the queue empty.
    pub fn pop(&self) -> Option<Task<J>> {
        if !self.queue_stat.wait() {
            return None;
        }
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_requests
    }

    fn wake(&self) {
        if let Err(e) = self.queue_stat.post() {
            error!("Failed to wake worker: {}", e);
        }
    }
}

/// How a worker handles one task.
pub trait Dispatch<J: Job>: Send + Sync {
    fn handle(&self, task: Task<J>, store: &StorePool);
}

/// Dispatcher already did the I/O: only parse and respond.
pub struct Proactor;

/// Worker does the tagged I/O and reports back through the job's flags.
pub struct Reactor;

impl<J: Job> Dispatch<J> for Proactor {
    fn handle(&self, task: Task<J>, store: &StorePool) {
        let conn = store.acquire();
        task.job.process(conn.as_deref());
    }
}

impl<J: Job> Dispatch<J> for Reactor {
    fn handle(&self, task: Task<J>, store: &StorePool) {
        let job = task.job;
        match task.op {
            Op::Read => {
                if job.read_once() {
                    let processed = {
                        let conn = store.acquire();
                        job.process(conn.as_deref())
                    };
                    job.complete(!processed);
                } else {
                    job.complete(true);
                }
            }
            Op::Write => {
                let written = job.write();
                job.complete(!written);
            }
        }
    }
}

impl ActorModel {
    fn strategy<J: Job>(self) -> Arc<dyn Dispatch<J>> {
        match self {
            ActorModel::Proactor => Arc::new(Proactor),
            ActorModel::Reactor => Arc::new(Reactor),
        }
    }
}

pub struct ThreadPool<J: Job> {
    queue: Arc<RequestQueue<J>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    model: ActorModel,
}

impl<J: Job> ThreadPool<J> {
    /// Starts `thread_number` workers. If any of them fails to spawn, the
    /// ones already running are stopped before the error is returned.
    pub fn new(
        model: ActorModel,
        store: Arc<StorePool>,
        thread_number: usize,
        max_requests: usize,
    ) -> Result<Self> {
        if thread_number == 0 {
            return Err(Error::Config("thread pool needs at least one worker".into()));
        }

        let queue = Arc::new(RequestQueue::new(max_requests)?);
        let shutdown = Arc::new(AtomicBool::new(false));
        let strategy = model.strategy::<J>();

        let mut pool = Self {
            queue,
            shutdown,
            workers: Vec::with_capacity(thread_number),
            model,
        };

        for index in 0..thread_number {
            let worker = Worker {
                queue: Arc::clone(&pool.queue),
                shutdown: Arc::clone(&pool.shutdown),
                strategy: Arc::clone(&strategy),
                store: Arc::clone(&store),
            };
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(source) => {
                    error!("Failed to spawn worker {}: {}", index, source);
                    // Dropping the pool stops and joins the started workers.
                    return Err(Error::Spawn { index, source });
                }
            }
        }

        info!(
            "Thread pool started: {} workers, queue capacity {}, {:?} model",
            thread_number, max_requests, model
        );
        Ok(pool)
    }

    /// Queues `op` for `job`. Returns `false` when the queue is full; the
    /// caller decides what to do with the rejected connection.
    pub fn submit(&self, job: Arc<J>, op: Op) -> bool {
        self.queue.push(Task { job, op })
    }

    pub fn model(&self) -> ActorModel {
        self.model
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl<J: Job> Drop for ThreadPool<J> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for _ in &self.workers {
            self.queue.wake();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

struct Worker<J: Job> {
    queue: Arc<RequestQueue<J>>,
    shutdown: Arc<AtomicBool>,
    strategy: Arc<dyn Dispatch<J>>,
    store: Arc<StorePool>,
}

impl<J: Job> Worker<J> {
    fn run(self) {
        debug!("[Thread {:?}] worker started", thread::current().name());
        loop {
            let task = self.queue.pop();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let Some(task) = task else {
                continue;
            };
            self.strategy.handle(task, &self.store);
        }
        debug!("[Thread {:?}] worker exiting", thread::current().name());
    }
}
