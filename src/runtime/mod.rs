//! Container runtime port
//!
//! Abstracts the host container engine behind a narrow `{run, stop}`
//! capability set, allowing an in-memory fake for tests.

mod docker;

pub use docker::DockerRuntime;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::task::{PortSpec, RestartPolicy, Task};

/// Error type for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Image pull failed: {0}")]
    ImagePull(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("{0}")]
    Other(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Everything the runtime needs to start one container
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Container name, derived from the task
    pub name: String,

    /// Image reference
    pub image: String,

    /// Memory limit in MiB (0 for unlimited)
    pub memory: u64,

    /// Disk request in MiB (recorded only; not enforced by Docker)
    pub disk: u64,

    /// Environment variables as KEY=VALUE pairs
    pub env: Vec<String>,

    /// Ports the container advertises
    pub exposed_ports: Vec<PortSpec>,

    /// Container port -> host port bindings
    pub port_bindings: HashMap<u16, u16>,

    /// Restart policy
    pub restart_policy: RestartPolicy,
}

impl From<&Task> for RunSpec {
    fn from(task: &Task) -> Self {
        let label = if task.name.is_empty() {
            "task"
        } else {
            task.name.as_str()
        };
        Self {
            name: format!("{}-{}", label, &task.id.simple().to_string()[..8]),
            image: task.image.clone(),
            memory: task.memory,
            disk: task.disk,
            env: Vec::new(),
            exposed_ports: task.exposed_ports.clone(),
            port_bindings: task.port_bindings.clone(),
            restart_policy: task.restart_policy,
        }
    }
}

/// Trait defining the container runtime interface
///
/// Both operations block until the underlying engine has acknowledged.
/// `run` pulls the image if absent, creates the container with the given
/// limits and policies, starts it, and returns the runtime's container id;
/// partial state after a failure is cleaned up best-effort and reported as
/// an error. `stop` stops and removes the container (including anonymous
/// volumes) and succeeds on an already-gone container.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull, create, and start a container; returns the container id
    async fn run(&self, spec: &RunSpec) -> RuntimeResult<String>;

    /// Stop and remove a container; idempotent
    async fn stop(&self, container_id: &str) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Protocol;

    #[test]
    fn test_run_spec_from_task() {
        let mut task = Task::new("web", "strm/helloworld-http");
        task.memory = 256;
        task.disk = 512;
        task.exposed_ports.push(PortSpec {
            port: 7777,
            protocol: Protocol::Tcp,
        });
        task.port_bindings.insert(7777, 30777);
        task.restart_policy = RestartPolicy::Always;

        let spec = RunSpec::from(&task);
        assert!(spec.name.starts_with("web-"));
        assert_eq!(spec.image, "strm/helloworld-http");
        assert_eq!(spec.memory, 256);
        assert_eq!(spec.exposed_ports.len(), 1);
        assert_eq!(spec.port_bindings.get(&7777), Some(&30777));
        assert_eq!(spec.restart_policy, RestartPolicy::Always);
    }

    #[test]
    fn test_run_spec_names_are_distinct_per_task() {
        let a = RunSpec::from(&Task::new("web", "busybox:latest"));
        let b = RunSpec::from(&Task::new("web", "busybox:latest"));
        assert_ne!(a.name, b.name);
    }
}
