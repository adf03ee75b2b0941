//! Task data model and state-transition rules

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task
///
/// Serialized as its integer ordinal on the wire (0=Pending .. 4=Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum State {
    Pending = 0,
    Scheduled = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
}

impl State {
    /// Whether a transition from this state to `next` is permitted
    ///
    /// Terminal states admit no transitions; re-delivery of the current
    /// non-terminal state (Scheduled -> Scheduled, Running -> Running) is
    /// permitted so late or duplicate events do not wedge the pipeline.
    pub fn can_transition_to(self, next: State) -> bool {
        match self {
            State::Pending => matches!(next, State::Scheduled),
            State::Scheduled => matches!(next, State::Scheduled | State::Running | State::Failed),
            State::Running => matches!(next, State::Running | State::Completed | State::Failed),
            State::Completed | State::Failed => false,
        }
    }

    /// Whether this state is terminal (Completed or Failed)
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

impl Default for State {
    fn default() -> Self {
        State::Pending
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Scheduled => write!(f, "scheduled"),
            State::Running => write!(f, "running"),
            State::Completed => write!(f, "completed"),
            State::Failed => write!(f, "failed"),
        }
    }
}

impl From<State> for u8 {
    fn from(state: State) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for State {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(State::Pending),
            1 => Ok(State::Scheduled),
            2 => Ok(State::Running),
            3 => Ok(State::Completed),
            4 => Ok(State::Failed),
            other => Err(format!("unknown task state ordinal: {}", other)),
        }
    }
}

/// Transport protocol for an exposed container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A port the container advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

/// Container restart policy as understood by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    None,
    OnFailure,
    Always,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::None
    }
}

/// The intended run of one container
///
/// `container_id` is set if and only if the task has ever reached `Running`.
/// Timestamps are `None` until set and RFC 3339 UTC on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Task {
    /// Unique task identifier, assigned by the submitting client
    pub id: Uuid,

    /// Human label, not required to be unique
    #[serde(default)]
    pub name: String,

    /// Current lifecycle state
    #[serde(default)]
    pub state: State,

    /// Container image reference
    pub image: String,

    /// Requested memory, in MiB
    #[serde(default)]
    pub memory: u64,

    /// Requested disk, in MiB (recorded, not enforced by the runtime)
    #[serde(default)]
    pub disk: u64,

    /// Ports the container advertises
    #[serde(default)]
    pub exposed_ports: Vec<PortSpec>,

    /// Container port -> host port bindings
    #[serde(default)]
    pub port_bindings: HashMap<u16, u16>,

    /// Restart policy passed through to the runtime
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Runtime-assigned container id, empty until the first successful start
    #[serde(default)]
    pub container_id: Option<String>,

    /// When the worker began starting the container
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// When the worker observed the container stopped
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task in its initial `Pending` state
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: State::Pending,
            image: image.into(),
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            port_bindings: HashMap::new(),
            restart_policy: RestartPolicy::default(),
            container_id: None,
            start_time: None,
            finish_time: None,
        }
    }
}

/// A client-issued desired-state transition for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskEvent {
    /// Unique event identifier
    pub id: Uuid,

    /// Desired next state for the embedded task
    pub state: State,

    /// When the event was created
    pub timestamp: DateTime<Utc>,

    /// Task snapshot: the full spec on first submission, id + state on stop
    pub task: Task,
}

impl TaskEvent {
    /// Create a new event carrying `task` toward `state`
    pub fn new(state: State, task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}
