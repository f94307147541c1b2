// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process job queue for simulation runs.
//!
//! Intake only enqueues; a [`TaskDispatcher`] drains the channel and runs up
//! to `concurrency` jobs at once, each under a hard time limit. When the
//! limit expires the job future is dropped, which kills the simulation
//! process; the request stays "started". There are no retries.
//!
//! A request identifier can be queued or running only once at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, Vars};

/// A request waiting to be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimulationJob {
    /// Request identifier.
    pub uuid: Uuid,
}

impl SimulationJob {
    /// Job for a request.
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid }
    }
}

/// Errors from submitting a job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The identifier is already queued or running.
    #[error("Simulation {0} is already queued or running")]
    AlreadyQueued(Uuid),
    /// The dispatcher is gone.
    #[error("Job queue is closed")]
    Closed,
}

/// Accepts jobs without waiting for them to run.
pub trait JobQueue: Send + Sync {
    /// Enqueue a job.
    fn submit(&self, job: SimulationJob) -> Result<(), QueueError>;
}

/// Executes one job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run the job to completion.
    async fn handle(&self, job: SimulationJob) -> crate::error::Result<()>;
}

/// Configuration for the task queue.
#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    /// Jobs executed at the same time.
    pub concurrency: usize,
    /// Hard limit per job.
    pub time_limit: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            time_limit: Duration::from_secs(30 * 60),
        }
    }
}

impl TaskQueueConfig {
    /// Load configuration from `LEEWAY_*` variables.
    ///
    /// - `LEEWAY_WORKER_CONCURRENCY` (default: 2)
    /// - `LEEWAY_TASK_TIME_LIMIT_SECS` (default: 1800)
    pub fn from_vars(vars: &Vars) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            concurrency: vars.parse("WORKER_CONCURRENCY", defaults.concurrency)?.max(1),
            time_limit: vars.secs("TASK_TIME_LIMIT_SECS", defaults.time_limit.as_secs())?,
        })
    }
}

/// Sending side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<SimulationJob>,
    in_flight: Arc<DashSet<Uuid>>,
}

impl TaskQueue {
    /// Create a queue and the dispatcher that drains it.
    pub fn new(config: TaskQueueConfig, handler: Arc<dyn JobHandler>) -> (Self, TaskDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(DashSet::new());
        let dispatcher = TaskDispatcher {
            rx,
            in_flight: in_flight.clone(),
            handler,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            shutdown: Arc::new(Notify::new()),
        };
        (Self { tx, in_flight }, dispatcher)
    }

    /// Number of jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// True if the identifier is queued or running.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.in_flight.contains(uuid)
    }
}

impl JobQueue for TaskQueue {
    fn submit(&self, job: SimulationJob) -> Result<(), QueueError> {
        if !self.in_flight.insert(job.uuid) {
            return Err(QueueError::AlreadyQueued(job.uuid));
        }
        if self.tx.send(job).is_err() {
            self.in_flight.remove(&job.uuid);
            return Err(QueueError::Closed);
        }
        debug!(uuid = %job.uuid, "Simulation enqueued");
        Ok(())
    }
}

/// Removes a job from the in-flight set however its task ends.
struct InFlightGuard {
    uuid: Uuid,
    in_flight: Arc<DashSet<Uuid>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.uuid);
    }
}

/// Background worker that executes queued jobs.
pub struct TaskDispatcher {
    rx: mpsc::UnboundedReceiver<SimulationJob>,
    in_flight: Arc<DashSet<Uuid>>,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    config: TaskQueueConfig,
    shutdown: Arc<Notify>,
}

impl TaskDispatcher {
    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the dispatcher loop.
    ///
    /// Exits on shutdown (aborting running jobs) or once every [`TaskQueue`]
    /// handle is dropped and the remaining jobs have finished.
    pub async fn run(mut self) {
        info!(
            concurrency = self.config.concurrency,
            time_limit_secs = self.config.time_limit.as_secs(),
            "Task dispatcher started"
        );

        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Task dispatcher received shutdown signal");
                    if !running.is_empty() {
                        warn!(jobs = running.len(), "Aborting running simulations");
                    }
                    running.shutdown().await;
                    break;
                }

                Some(done) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = done
                        && e.is_panic()
                    {
                        error!(error = %e, "Simulation task panicked");
                    }
                }

                job = self.rx.recv() => {
                    let Some(job) = job else {
                        debug!("Job queue closed, waiting for running simulations");
                        while let Some(done) = running.join_next().await {
                            if let Err(e) = done
                                && e.is_panic()
                            {
                                error!(error = %e, "Simulation task panicked");
                            }
                        }
                        break;
                    };
                    running.spawn(execute(
                        job,
                        self.handler.clone(),
                        self.semaphore.clone(),
                        self.config.time_limit,
                        InFlightGuard { uuid: job.uuid, in_flight: self.in_flight.clone() },
                    ));
                }
            }
        }

        info!("Task dispatcher stopped");
    }
}

async fn execute(
    job: SimulationJob,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    time_limit: Duration,
    _guard: InFlightGuard,
) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };

    debug!(uuid = %job.uuid, "Simulation task started");
    match tokio::time::timeout(time_limit, handler.handle(job)).await {
        Ok(Ok(())) => debug!(uuid = %job.uuid, "Simulation task finished"),
        Ok(Err(e)) => error!(uuid = %job.uuid, error = %e, "Simulation task failed"),
        Err(_) => error!(
            uuid = %job.uuid,
            time_limit_secs = time_limit.as_secs(),
            "Simulation task exceeded its time limit and was killed"
        ),
    }
}

/// Test double that records submitted jobs instead of running them.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<SimulationJob>>,
    closed: bool,
}

impl RecordingQueue {
    /// Accepting queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects every job with [`QueueError::Closed`].
    pub fn closed() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            closed: true,
        }
    }

    /// Jobs submitted so far.
    pub fn jobs(&self) -> Vec<SimulationJob> {
        self.jobs
            .lock()
            .map(|jobs| jobs.clone())
            .unwrap_or_default()
    }
}

impl JobQueue for RecordingQueue {
    fn submit(&self, job: SimulationJob) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        let mut jobs = self.jobs.lock().map_err(|_| QueueError::Closed)?;
        if jobs.contains(&job) {
            return Err(QueueError::AlreadyQueued(job.uuid));
        }
        jobs.push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        delay: Duration,
        running: AtomicUsize,
        max_seen: AtomicUsize,
        done: AtomicUsize,
        finished: Notify,
    }

    impl CountingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                running: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
                finished: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: SimulationJob) -> crate::error::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            self.finished.notify_one();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let handler = CountingHandler::new(Duration::from_millis(50));
        let (queue, _dispatcher) = TaskQueue::new(TaskQueueConfig::default(), handler);
        let job = SimulationJob::new(Uuid::new_v4());

        queue.submit(job).unwrap();
        assert_eq!(queue.submit(job), Err(QueueError::AlreadyQueued(job.uuid)));
        assert!(queue.contains(&job.uuid));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let handler = CountingHandler::new(Duration::from_millis(1));
        let (queue, dispatcher) = TaskQueue::new(TaskQueueConfig::default(), handler);
        drop(dispatcher);
        let job = SimulationJob::new(Uuid::new_v4());
        assert_eq!(queue.submit(job), Err(QueueError::Closed));
        assert!(!queue.contains(&job.uuid));
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let handler = CountingHandler::new(Duration::from_millis(30));
        let config = TaskQueueConfig {
            concurrency: 2,
            time_limit: Duration::from_secs(5),
        };
        let (queue, dispatcher) = TaskQueue::new(config, handler.clone());
        let handle = tokio::spawn(dispatcher.run());

        for _ in 0..5 {
            queue.submit(SimulationJob::new(Uuid::new_v4())).unwrap();
        }
        drop(queue);
        handle.await.unwrap();

        assert_eq!(handler.done.load(Ordering::SeqCst), 5);
        assert!(handler.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_time_limit_drops_job_and_frees_identifier() {
        let handler = CountingHandler::new(Duration::from_secs(60));
        let config = TaskQueueConfig {
            concurrency: 1,
            time_limit: Duration::from_millis(20),
        };
        let (queue, dispatcher) = TaskQueue::new(config, handler.clone());
        let shutdown = dispatcher.shutdown_handle();
        let handle = tokio::spawn(dispatcher.run());

        let job = SimulationJob::new(Uuid::new_v4());
        queue.submit(job).unwrap();

        for _ in 0..100 {
            if !queue.contains(&job.uuid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!queue.contains(&job.uuid));
        assert_eq!(handler.done.load(Ordering::SeqCst), 0);

        // The identifier can be queued again once the killed job is gone.
        queue.submit(job).unwrap();

        shutdown.notify_one();
        handle.await.unwrap();
    }

    #[test]
    fn test_recording_queue() {
        let queue = RecordingQueue::new();
        let job = SimulationJob::new(Uuid::new_v4());
        queue.submit(job).unwrap();
        assert_eq!(queue.submit(job), Err(QueueError::AlreadyQueued(job.uuid)));
        assert_eq!(queue.jobs(), vec![job]);

        assert_eq!(RecordingQueue::closed().submit(job), Err(QueueError::Closed));
    }
}
