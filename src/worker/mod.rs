//! Worker: the node-level agent that owns a container runtime and drives
//! tasks assigned to it
//!
//! The worker maintains an at-most-once execution contract per task id:
//! desired tasks are dequeued in FIFO order, checked against the
//! state-transition table, and acted on against the runtime port. Observed
//! state lands in the task DB for the manager to reconcile.

pub mod api;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::runtime::{ContainerRuntime, RunSpec, RuntimeError};
use crate::stats::{HostStats, StatsSource};
use crate::task::{State, Task};

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("task {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition { id: Uuid, from: State, to: State },

    #[error("task {id}: unexpected desired state {state}")]
    UnexpectedState { id: Uuid, state: State },

    #[error("task {0} has no container to stop")]
    MissingContainer(Uuid),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// What one pass of the drain loop accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The queue was empty; no runtime call was made
    Idle,

    /// The task's container was started; the task is now `Running`
    Started(Uuid),

    /// The task's container was stopped; the task is now `Completed`
    Stopped(Uuid),
}

/// Node-level task executor
pub struct Worker {
    /// Human-readable node name, used in logs
    name: String,

    /// FIFO of inbound task desires
    queue: Mutex<VecDeque<Task>>,

    /// Last-known state of every task this worker has seen
    db: DashMap<Uuid, Task>,

    /// Latest host stats sample
    stats: RwLock<HostStats>,

    /// Container runtime port
    runtime: Arc<dyn ContainerRuntime>,

    /// Host statistics port
    stats_source: Arc<dyn StatsSource>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        stats_source: Arc<dyn StatsSource>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            db: DashMap::new(),
            stats: RwLock::new(HostStats::default()),
            runtime,
            stats_source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a desired task. No validation happens here; transitions are
    /// checked when the task is dequeued.
    pub fn add_task(&self, task: Task) {
        debug!("Worker {}: queued task {}", self.name, task.id);
        self.queue.lock().push_back(task);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Snapshot of all known tasks (values, not references)
    pub fn get_tasks(&self) -> Vec<Task> {
        self.db.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.db.get(&id).map(|entry| entry.value().clone())
    }

    /// Latest host stats sample, including the running-task count
    pub fn stats(&self) -> HostStats {
        self.stats.read().clone()
    }

    /// Number of tasks currently in the `Running` state
    pub fn running_task_count(&self) -> usize {
        self.db
            .iter()
            .filter(|entry| entry.value().state == State::Running)
            .count()
    }

    /// Dequeue one task and act on it
    ///
    /// Returns `Outcome::Idle` if the queue was empty. An event whose
    /// transition is not allowed from the task's current state is dropped
    /// without touching the DB or the runtime.
    pub async fn run_next(&self) -> Result<Outcome, WorkerError> {
        let Some(desired) = self.queue.lock().pop_front() else {
            return Ok(Outcome::Idle);
        };

        // First sighting inserts the task as submitted
        let current = self
            .db
            .entry(desired.id)
            .or_insert_with(|| desired.clone())
            .clone();

        if !current.state.can_transition_to(desired.state) {
            warn!(
                "Worker {}: task {}: dropping event, transition {} -> {} not allowed",
                self.name, desired.id, current.state, desired.state
            );
            return Err(WorkerError::InvalidTransition {
                id: desired.id,
                from: current.state,
                to: desired.state,
            });
        }

        match desired.state {
            State::Scheduled => self.start_task(desired).await,
            State::Completed => self.stop_task(current).await,
            state => Err(WorkerError::UnexpectedState {
                id: desired.id,
                state,
            }),
        }
    }

    /// Start the task's container and promote it to `Running`, or to the
    /// terminal `Failed` on a runtime error
    async fn start_task(&self, mut task: Task) -> Result<Outcome, WorkerError> {
        task.start_time = Some(Utc::now());
        let spec = RunSpec::from(&task);

        match self.runtime.run(&spec).await {
            Ok(container_id) => {
                info!(
                    "Worker {}: task {}: container {} running",
                    self.name, task.id, container_id
                );
                task.container_id = Some(container_id);
                task.state = State::Running;
                let id = task.id;
                self.db.insert(id, task);
                Ok(Outcome::Started(id))
            }
            Err(e) => {
                error!("Worker {}: task {}: start failed: {}", self.name, task.id, e);
                task.state = State::Failed;
                self.db.insert(task.id, task);
                Err(e.into())
            }
        }
    }

    /// Stop and remove the task's container, then mark it `Completed`
    ///
    /// A runtime failure leaves the task `Running`; the stop is retried
    /// when a later `Completed` event is dequeued.
    async fn stop_task(&self, mut task: Task) -> Result<Outcome, WorkerError> {
        let container_id = task
            .container_id
            .clone()
            .ok_or(WorkerError::MissingContainer(task.id))?;

        self.runtime.stop(&container_id).await.map_err(|e| {
            error!(
                "Worker {}: task {}: stop of container {} failed: {}",
                self.name, task.id, container_id, e
            );
            WorkerError::Runtime(e)
        })?;

        task.finish_time = Some(Utc::now());
        task.state = State::Completed;
        let id = task.id;
        info!("Worker {}: task {}: completed", self.name, id);
        self.db.insert(id, task);
        Ok(Outcome::Stopped(id))
    }

    /// Take one stats sample and publish it to the stats slot
    ///
    /// On a sampling error the previous sample is retained.
    pub fn sample_stats(&self) {
        match self.stats_source.sample() {
            Ok(mut sample) => {
                sample.task_count = self.running_task_count();
                *self.stats.write() = sample;
            }
            Err(e) => {
                warn!(
                    "Worker {}: stats sampling failed, keeping previous sample: {}",
                    self.name, e
                );
            }
        }
    }

    /// Spawn the task drain loop
    ///
    /// Processes the queue continuously and sleeps for `interval` when it
    /// runs dry. The shutdown token is checked between iterations and raced
    /// against the idle sleep.
    pub fn spawn_drain_loop(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Worker {}: task drain loop started", self.name);
            loop {
                if token.is_cancelled() {
                    break;
                }
                match self.run_next().await {
                    Ok(Outcome::Idle) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    Ok(outcome) => debug!("Worker {}: {:?}", self.name, outcome),
                    Err(e) => warn!("Worker {}: task processing error: {}", self.name, e),
                }
            }
            debug!("Worker {}: task drain loop stopped", self.name);
        })
    }

    /// Spawn the periodic stats sampling loop
    pub fn spawn_stats_loop(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Worker {}: stats loop stopped", self.name);
                        break;
                    }
                    _ = ticker.tick() => self.sample_stats(),
                }
            }
        })
    }
}
