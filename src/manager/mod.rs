//! Manager: the cluster-level coordinator that places tasks and reconciles
//! state
//!
//! Desired-state events flow in through `add_task`, are validated against
//! the transition table, and drain through `send_work`, which places each
//! task on exactly one worker and forwards it over the gateway port.
//! Observed state flows back through `update_tasks`, which polls every
//! worker and merges reported tasks into the manager's view.

pub mod api;
pub mod client;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::task::{State, Task, TaskEvent};

use client::WorkerGateway;

/// Sleep between dispatch passes when the pending queue is empty
const DISPATCH_IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Manager errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("event {event}: desired state {state} cannot be submitted")]
    UnsupportedState { event: Uuid, state: State },

    #[error("task {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition { id: Uuid, from: State, to: State },

    #[error("no task with id {0}")]
    UnknownTask(Uuid),

    #[error("no workers available for placement")]
    NoWorkers,
}

/// What one pass of the dispatch loop accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The pending queue was empty
    Idle,

    /// The event was delivered to its worker
    Sent(Uuid),

    /// Delivery failed; the event was re-enqueued for one retry
    Requeued(Uuid),

    /// Delivery failed again; the event was dropped for operator attention
    Dropped(Uuid),
}

/// A pending event plus its delivery-attempt count
struct PendingEvent {
    event: TaskEvent,
    attempts: u32,
}

/// The bidirectional placement relation and the round-robin cursor
///
/// Both mappings live behind one mutex so they can never be observed
/// inconsistent. Workers are stored as opaque addresses and resolved on
/// read.
#[derive(Default)]
struct Placements {
    by_worker: HashMap<String, HashSet<Uuid>>,
    by_task: HashMap<Uuid, String>,
    cursor: usize,
}

/// Cluster-level task coordinator
pub struct Manager {
    /// FIFO of accepted, not-yet-dispatched events
    pending: Mutex<VecDeque<PendingEvent>>,

    /// Manager's view of every task in the fleet
    task_db: DashMap<Uuid, Task>,

    /// Every event ever accepted, keyed by event id
    event_db: DashMap<Uuid, TaskEvent>,

    /// Worker addresses this manager places onto
    workers: Vec<String>,

    /// Placement indices
    placements: Mutex<Placements>,

    /// Worker gateway port
    gateway: Arc<dyn WorkerGateway>,
}

impl Manager {
    pub fn new(workers: Vec<String>, gateway: Arc<dyn WorkerGateway>) -> Self {
        let cursor = workers.len().saturating_sub(1);
        Self {
            pending: Mutex::new(VecDeque::new()),
            task_db: DashMap::new(),
            event_db: DashMap::new(),
            workers,
            placements: Mutex::new(Placements {
                cursor,
                ..Default::default()
            }),
            gateway,
        }
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Accept a desired-state event
    ///
    /// Obviously bad transitions are rejected here; the worker validates
    /// again at dequeue time. Only accepted events are recorded in the
    /// event DB and enqueued.
    pub fn add_task(&self, event: TaskEvent) -> Result<Task, ManagerError> {
        if !matches!(event.state, State::Scheduled | State::Completed) {
            return Err(ManagerError::UnsupportedState {
                event: event.id,
                state: event.state,
            });
        }

        let current = self
            .task_db
            .get(&event.task.id)
            .map(|entry| entry.state)
            .unwrap_or(event.task.state);

        if !current.can_transition_to(event.state) {
            return Err(ManagerError::InvalidTransition {
                id: event.task.id,
                from: current,
                to: event.state,
            });
        }

        // First sighting records the task as submitted
        self.task_db
            .entry(event.task.id)
            .or_insert_with(|| event.task.clone());

        info!(
            "Manager: accepted event {} ({} -> {}) for task {}",
            event.id, current, event.state, event.task.id
        );

        let task = event.task.clone();
        self.event_db.insert(event.id, event.clone());
        self.pending.lock().push_back(PendingEvent { event, attempts: 0 });
        Ok(task)
    }

    /// Build and accept a stop event for a known task
    pub fn stop_task(&self, id: Uuid) -> Result<(), ManagerError> {
        let stored = self
            .task_db
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(ManagerError::UnknownTask(id))?;

        let mut copy = stored;
        copy.state = State::Completed;
        let event = TaskEvent::new(State::Completed, copy);

        debug!("Manager: queueing stop event {} for task {}", event.id, id);
        self.add_task(event)?;
        Ok(())
    }

    /// Snapshot of the manager's view of every known task
    pub fn get_tasks(&self) -> Vec<Task> {
        self.task_db
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.task_db.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of events ever accepted
    pub fn event_count(&self) -> usize {
        self.event_db.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Pure placement: the worker the next unplaced task would land on
    ///
    /// Round-robin with a lowest-load tie-break: the worker with the
    /// fewest placed tasks wins; on equal counts, the next worker after
    /// the last placement pointer (wrap-around).
    pub fn select_worker(&self) -> Option<String> {
        let placements = self.placements.lock();
        self.pick_worker(&placements)
            .map(|index| self.workers[index].clone())
    }

    fn pick_worker(&self, placements: &Placements) -> Option<usize> {
        if self.workers.is_empty() {
            return None;
        }

        let counts: Vec<usize> = self
            .workers
            .iter()
            .map(|worker| {
                placements
                    .by_worker
                    .get(worker)
                    .map_or(0, |tasks| tasks.len())
            })
            .collect();
        let lowest = *counts.iter().min()?;

        for offset in 1..=self.workers.len() {
            let index = (placements.cursor + offset) % self.workers.len();
            if counts[index] == lowest {
                return Some(index);
            }
        }
        None
    }

    /// The worker currently owning a task id, if placed
    pub fn placement_of(&self, id: Uuid) -> Option<String> {
        self.placements.lock().by_task.get(&id).cloned()
    }

    /// Pop one pending event, resolve its worker, and deliver it
    ///
    /// A task id that already has an owner is always routed to that owner;
    /// placement runs only for unplaced ids. Delivery failure re-enqueues
    /// the event once, then drops it with a terminal log.
    pub async fn send_work(&self) -> Result<Dispatch, ManagerError> {
        let Some(mut item) = self.pending.lock().pop_front() else {
            return Ok(Dispatch::Idle);
        };

        let task_id = item.event.task.id;
        let worker = {
            let mut placements = self.placements.lock();
            match placements.by_task.get(&task_id) {
                Some(worker) => worker.clone(),
                None => {
                    let Some(index) = self.pick_worker(&placements) else {
                        error!(
                            "Manager: event {}: no workers available, dropping",
                            item.event.id
                        );
                        return Err(ManagerError::NoWorkers);
                    };
                    let worker = self.workers[index].clone();
                    placements.cursor = index;
                    placements.by_task.insert(task_id, worker.clone());
                    placements
                        .by_worker
                        .entry(worker.clone())
                        .or_default()
                        .insert(task_id);
                    debug!("Manager: placed task {} on worker {}", task_id, worker);
                    worker
                }
            }
        };

        // Record the desired state; reconciliation overwrites it with the
        // worker's observed state later
        let mut desired = item.event.task.clone();
        desired.state = item.event.state;
        self.task_db.insert(task_id, desired);

        match self.gateway.submit_task(&worker, &item.event).await {
            Ok(_accepted) => {
                info!(
                    "Manager: event {} for task {} delivered to worker {}",
                    item.event.id, task_id, worker
                );
                Ok(Dispatch::Sent(task_id))
            }
            Err(e) => {
                item.attempts += 1;
                if item.attempts > 1 {
                    error!(
                        "Manager: event {} for task {} undeliverable to worker {}, dropping: {}",
                        item.event.id, task_id, worker, e
                    );
                    Ok(Dispatch::Dropped(task_id))
                } else {
                    warn!(
                        "Manager: event {} for task {} failed to reach worker {}, requeueing: {}",
                        item.event.id, task_id, worker, e
                    );
                    self.pending.lock().push_back(item);
                    Ok(Dispatch::Requeued(task_id))
                }
            }
        }
    }

    /// Poll every worker and merge its reported tasks into the task DB
    ///
    /// A worker's reported state wins for any task it owns; containerId and
    /// timestamps are copied in when set in the report. Tasks a worker
    /// reports but does not own are ignored.
    pub async fn update_tasks(&self) {
        for worker in &self.workers {
            let tasks = match self.gateway.list_tasks(worker).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!("Manager: reconciliation: worker {} unreachable: {}", worker, e);
                    continue;
                }
            };

            let owned: HashMap<Uuid, String> = self.placements.lock().by_task.clone();

            for reported in tasks {
                if owned.get(&reported.id).map(String::as_str) != Some(worker.as_str()) {
                    debug!(
                        "Manager: reconciliation: ignoring task {} not owned by {}",
                        reported.id, worker
                    );
                    continue;
                }

                if let Some(mut entry) = self.task_db.get_mut(&reported.id) {
                    entry.state = reported.state;
                    if reported.container_id.is_some() {
                        entry.container_id = reported.container_id.clone();
                    }
                    if reported.start_time.is_some() {
                        entry.start_time = reported.start_time;
                    }
                    if reported.finish_time.is_some() {
                        entry.finish_time = reported.finish_time;
                    }
                }
            }
        }
    }

    /// Spawn the event dispatch loop
    ///
    /// Event-driven: drains the pending queue continuously and sleeps
    /// briefly when it runs dry.
    pub fn spawn_dispatch_loop(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Manager: dispatch loop started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                match self.send_work().await {
                    Ok(Dispatch::Idle) => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(DISPATCH_IDLE_SLEEP) => {}
                        }
                    }
                    Ok(dispatch) => debug!("Manager: {:?}", dispatch),
                    Err(e) => warn!("Manager: dispatch error: {}", e),
                }
            }
            debug!("Manager: dispatch loop stopped");
        })
    }

    /// Spawn the reconciliation loop polling workers on a fixed cadence
    pub fn spawn_reconcile_loop(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick
            info!("Manager: reconciliation loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Manager: reconciliation loop stopped");
                        break;
                    }
                    _ = ticker.tick() => self.update_tasks().await,
                }
            }
        })
    }
}
