//! Docker implementation of the container runtime port

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::task::{PortSpec, RestartPolicy as TaskRestartPolicy};

use super::{ContainerRuntime, RunSpec, RuntimeError, RuntimeResult};

/// Seconds to wait for a graceful stop before the engine kills the container
const STOP_TIMEOUT_SECS: i64 = 10;

/// Docker-backed container runtime
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon
    pub fn new() -> RuntimeResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(RuntimeError::Docker)?;
        Ok(Self { client })
    }

    /// Create a runtime around an existing client
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Ensure the image exists locally, pulling if necessary
    async fn ensure_image_exists(&self, image: &str) -> RuntimeResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists", image);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!("Image {} not found, pulling...", image);
            }
            Err(e) => {
                warn!("Error inspecting image {}: {}", image, e);
                // Try to pull anyway
            }
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    error!("Failed to pull image {}: {}", image, e);
                    return Err(RuntimeError::ImagePull(e.to_string()));
                }
            }
        }

        info!("Successfully pulled image {}", image);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &RunSpec) -> RuntimeResult<String> {
        self.ensure_image_exists(&spec.image).await?;

        let mut labels = HashMap::new();
        labels.insert("Service".to_string(), "Flotilla".to_string());

        let host_config = HostConfig {
            port_bindings: Some(build_port_bindings(&spec.port_bindings, &spec.exposed_ports)),
            memory: if spec.memory > 0 {
                Some(spec.memory as i64 * 1024 * 1024)
            } else {
                None
            },
            restart_policy: Some(RestartPolicy {
                name: Some(restart_policy_name(spec.restart_policy)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(build_exposed_ports(&spec.exposed_ports)),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| {
                if let bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } = e
                {
                    return RuntimeError::ContainerExists(spec.name.clone());
                }
                RuntimeError::Docker(e)
            })?;

        if let Err(e) = self
            .client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Partial state is treated as failure; remove what we created
            warn!("Failed to start container {}, removing it: {}", spec.name, e);
            let options = RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            };
            if let Err(remove_err) = self
                .client
                .remove_container(&created.id, Some(options))
                .await
            {
                warn!(
                    "Failed to clean up container {} after start failure: {}",
                    spec.name, remove_err
                );
            }
            return Err(RuntimeError::Docker(e));
        }

        info!("Started container {} ({})", spec.name, created.id);
        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(_) => {}
            // Already stopped or already gone both count as stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            })
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already stopped or gone", container_id);
            }
            Err(e) => return Err(RuntimeError::Docker(e)),
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => {
                info!("Removed container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} doesn't exist, nothing to remove", container_id);
                Ok(())
            }
            Err(e) => Err(RuntimeError::Docker(e)),
        }
    }
}

/// Build the exposed-ports map in Docker's "port/proto" key format
fn build_exposed_ports(ports: &[PortSpec]) -> HashMap<String, HashMap<(), ()>> {
    let mut exposed = HashMap::new();
    for spec in ports {
        exposed.insert(format!("{}/{}", spec.port, spec.protocol), HashMap::new());
    }
    exposed
}

/// Build port bindings on all host interfaces
///
/// Each bound container port is published for the protocol(s) it exposes;
/// a bound port with no exposure entry falls back to Docker's tcp default.
fn build_port_bindings(
    bindings: &HashMap<u16, u16>,
    exposed_ports: &[PortSpec],
) -> HashMap<String, Option<Vec<PortBinding>>> {
    let mut result: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for (container_port, host_port) in bindings {
        let binding = vec![PortBinding {
            host_ip: None,
            host_port: Some(host_port.to_string()),
        }];

        let protocols: Vec<_> = exposed_ports
            .iter()
            .filter(|spec| spec.port == *container_port)
            .map(|spec| spec.protocol)
            .collect();

        if protocols.is_empty() {
            result.insert(format!("{}/tcp", container_port), Some(binding));
            continue;
        }
        for protocol in protocols {
            result.insert(
                format!("{}/{}", container_port, protocol),
                Some(binding.clone()),
            );
        }
    }
    result
}

/// Map the task restart policy onto Docker's enum
fn restart_policy_name(policy: TaskRestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        TaskRestartPolicy::None => RestartPolicyNameEnum::NO,
        TaskRestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        TaskRestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Protocol;

    #[test]
    fn test_build_exposed_ports() {
        let ports = vec![
            PortSpec {
                port: 80,
                protocol: Protocol::Tcp,
            },
            PortSpec {
                port: 53,
                protocol: Protocol::Udp,
            },
        ];

        let exposed = build_exposed_ports(&ports);
        assert_eq!(exposed.len(), 2);
        assert!(exposed.contains_key("80/tcp"));
        assert!(exposed.contains_key("53/udp"));
    }

    #[test]
    fn test_build_port_bindings_follows_exposed_protocols() {
        let mut bindings = HashMap::new();
        bindings.insert(8080u16, 30080u16);
        let exposed = vec![PortSpec {
            port: 8080,
            protocol: Protocol::Tcp,
        }];

        let result = build_port_bindings(&bindings, &exposed);
        assert_eq!(result.len(), 1);

        let tcp = result.get("8080/tcp").unwrap().as_ref().unwrap();
        assert_eq!(tcp[0].host_port.as_deref(), Some("30080"));
        assert!(!result.contains_key("8080/udp"));
    }

    #[test]
    fn test_build_port_bindings_covers_every_exposed_protocol() {
        let mut bindings = HashMap::new();
        bindings.insert(53u16, 30053u16);
        let exposed = vec![
            PortSpec {
                port: 53,
                protocol: Protocol::Tcp,
            },
            PortSpec {
                port: 53,
                protocol: Protocol::Udp,
            },
        ];

        let result = build_port_bindings(&bindings, &exposed);
        assert_eq!(result.len(), 2);
        assert!(result.contains_key("53/tcp"));
        assert!(result.contains_key("53/udp"));
    }

    #[test]
    fn test_build_port_bindings_defaults_to_tcp() {
        let mut bindings = HashMap::new();
        bindings.insert(9000u16, 30900u16);

        let result = build_port_bindings(&bindings, &[]);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("9000/tcp"));
    }

    #[test]
    fn test_restart_policy_mapping() {
        assert_eq!(
            restart_policy_name(TaskRestartPolicy::None),
            RestartPolicyNameEnum::NO
        );
        assert_eq!(
            restart_policy_name(TaskRestartPolicy::OnFailure),
            RestartPolicyNameEnum::ON_FAILURE
        );
        assert_eq!(
            restart_policy_name(TaskRestartPolicy::Always),
            RestartPolicyNameEnum::ALWAYS
        );
    }
}
