//! Container management

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{status_code, DockerError, Result};
use crate::service::{LogOutput, LogStream};
use crate::types::ResourceLimits;

/// Container specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, used to terminate it later
    pub name: String,

    /// Docker image to use
    pub image: String,

    /// Command to execute (image default when empty)
    pub command: Vec<String>,

    /// Environment variables
    pub environment: HashMap<String, String>,

    /// Volume mounts
    pub volumes: Vec<VolumeMount>,

    /// Working directory
    pub working_dir: Option<String>,

    /// Container labels
    pub labels: HashMap<String, String>,

    /// Resource ceilings
    pub limits: ResourceLimits,
}

/// Volume mount specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path
    pub host_path: PathBuf,

    /// Container path
    pub container_path: String,

    /// Read-only mount
    pub read_only: bool,
}

impl VolumeMount {
    /// Bind specification in `host:container[:ro]` form
    pub fn bind(&self) -> String {
        format!(
            "{}:{}{}",
            self.host_path.display(),
            self.container_path,
            if self.read_only { ":ro" } else { "" }
        )
    }
}

impl ContainerSpec {
    /// Create a new container specification
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            environment: HashMap::new(),
            volumes: Vec::new(),
            working_dir: None,
            labels: HashMap::new(),
            limits: ResourceLimits::default(),
        }
    }

    /// Add a command
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add volume mount
    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    /// Set working directory
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set resource ceilings
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Convert to Bollard container config
    pub fn to_container_config(&self) -> Config<String> {
        let binds: Vec<String> = self.volumes.iter().map(VolumeMount::bind).collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            memory: self.limits.memory,
            // Equal to memory: no swap on top of the ceiling
            memory_swap: self.limits.memory,
            nano_cpus: self.limits.nano_cpus,
            network_mode: self.limits.network_mode.clone(),
            ..Default::default()
        };

        Config {
            image: Some(self.image.clone()),
            cmd: if self.command.is_empty() {
                None
            } else {
                Some(self.command.clone())
            },
            env: Some(
                self.environment
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect(),
            ),
            working_dir: self.working_dir.clone(),
            labels: if self.labels.is_empty() {
                None
            } else {
                Some(self.labels.clone())
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Container manager for executing operations
pub struct ContainerManager<'a> {
    client: &'a bollard::Docker,
}

impl<'a> ContainerManager<'a> {
    /// Create a new container manager
    pub fn new(client: &'a bollard::Docker) -> Self {
        Self { client }
    }

    /// Create and start a container
    pub async fn run(&self, spec: &ContainerSpec) -> Result<String> {
        let config = spec.to_container_config();
        let options = CreateContainerOptions { name: spec.name.clone(), platform: None };

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| DockerError::ExecutionFailed {
                reason: format!("failed to create container {}: {e}", spec.name),
            })?;

        if let Err(e) = self.client.start_container::<String>(&container.id, None).await {
            // Do not leave a created-but-never-started container behind
            let _ = self.remove(&container.id, true).await;
            return Err(DockerError::ExecutionFailed {
                reason: format!("failed to start container {}: {e}", spec.name),
            });
        }

        debug!("Started container {} ({})", spec.name, container.id);
        Ok(container.id)
    }

    /// Follow container logs from the beginning
    ///
    /// Each stream is decoded on its own, so a character split across two
    /// frames arrives whole in the later chunk.
    pub fn logs(&self, container: &str) -> LogStream {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };

        let mut stdout = Utf8Decoder::default();
        let mut stderr = Utf8Decoder::default();
        let stream = self.client.logs(container, Some(options)).filter_map(move |result| {
            let item = match result {
                Ok(bollard::container::LogOutput::StdOut { message }) => {
                    stdout.decode(&message).map(|text| Ok(LogOutput::Stdout(text)))
                }
                Ok(bollard::container::LogOutput::StdErr { message }) => {
                    stderr.decode(&message).map(|text| Ok(LogOutput::Stderr(text)))
                }
                Ok(_) => None,
                Err(e) => Some(Err(DockerError::StreamError { reason: e.to_string() })),
            };
            futures::future::ready(item)
        });

        Box::pin(stream)
    }

    /// Wait for the container to stop running
    pub async fn wait(&self, container: &str) -> Result<i64> {
        let options = WaitContainerOptions { condition: "not-running" };

        let mut stream = self.client.wait_container(container, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // The daemon reports non-zero exits as wait errors
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) if status_code(&e) == Some(404) => {
                Err(DockerError::ContainerNotFound { id: container.to_string() })
            }
            Some(Err(e)) => Err(DockerError::Client(e)),
            None => Err(DockerError::StreamError {
                reason: "Container wait stream ended unexpectedly".to_string(),
            }),
        }
    }

    /// Stop the container, killing it after `grace`
    pub async fn stop(&self, container: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions { t: grace.as_secs() as i64 };

        match self.client.stop_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                Err(DockerError::ContainerNotFound { id: container.to_string() })
            }
            Err(e) => Err(DockerError::Client(e)),
        }
    }

    /// Send SIGKILL to the container
    pub async fn kill(&self, container: &str) -> Result<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };

        match self.client.kill_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            // 409: container is not running
            Err(e) if status_code(&e) == Some(409) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                Err(DockerError::ContainerNotFound { id: container.to_string() })
            }
            Err(e) => Err(DockerError::Client(e)),
        }
    }

    /// Remove container
    pub async fn remove(&self, container: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { force, v: true, ..Default::default() };

        match self.client.remove_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                Err(DockerError::ContainerNotFound { id: container.to_string() })
            }
            Err(e) => Err(DockerError::Client(e)),
        }
    }

    /// List containers carrying `label`, running or not
    pub async fn list(&self, label: &str) -> Result<Vec<String>> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let options = ListContainersOptions::<String> { all: true, filters, ..Default::default() };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(DockerError::Client)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                c.names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .or(c.id)
            })
            .collect())
    }
}

/// Incremental UTF-8 decoding of a byte stream
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// one; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `chunk`, returning `None` if no complete character is available yet
    fn decode(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Truncated sequence, wait for the rest
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);

        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_joins_split_characters() {
        let bytes = "✓ done".as_bytes();
        let mut decoder = Utf8Decoder::default();

        assert_eq!(decoder.decode(&bytes[..1]), None);
        assert_eq!(decoder.decode(&bytes[1..2]), None);
        assert_eq!(decoder.decode(&bytes[2..]).as_deref(), Some("✓ done"));
        assert!(decoder.pending.is_empty());
    }

    #[test]
    fn test_decoder_keeps_only_the_truncated_tail() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();

        assert_eq!(decoder.decode(&bytes[..2]).as_deref(), Some("h"));
        assert_eq!(decoder.decode(&bytes[2..]).as_deref(), Some("éllo"));
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok \xff then").as_deref(), Some("ok \u{fffd} then"));
        assert!(decoder.pending.is_empty());
    }

    #[test]
    fn test_container_spec_creation() {
        let spec = ContainerSpec::new("appbuild-b1-1", "appbuild-builder:latest")
            .with_command(vec!["build".to_string()])
            .with_env("BUILD_ID", "b1")
            .with_working_dir("/project")
            .with_label("appbuild.managed", "true");

        assert_eq!(spec.name, "appbuild-b1-1");
        assert_eq!(spec.image, "appbuild-builder:latest");
        assert_eq!(spec.command, vec!["build"]);
        assert_eq!(spec.environment.get("BUILD_ID").map(String::as_str), Some("b1"));
        assert_eq!(spec.working_dir, Some("/project".to_string()));
    }

    #[test]
    fn test_container_config_applies_limits_and_mounts() {
        let spec = ContainerSpec::new("c", "img")
            .with_volume(VolumeMount {
                host_path: PathBuf::from("/src/project"),
                container_path: "/project".to_string(),
                read_only: true,
            })
            .with_volume(VolumeMount {
                host_path: PathBuf::from("/builds/b1"),
                container_path: "/output".to_string(),
                read_only: false,
            })
            .with_limits(ResourceLimits {
                memory: Some(512 * 1024 * 1024),
                nano_cpus: Some(1_500_000_000),
                network_mode: Some("none".to_string()),
            });

        let config = spec.to_container_config();
        let host = config.host_config.expect("host config");
        assert_eq!(
            host.binds,
            Some(vec!["/src/project:/project:ro".to_string(), "/builds/b1:/output".to_string()])
        );
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert!(config.cmd.is_none());
        assert!(config.labels.is_none());
    }
}
