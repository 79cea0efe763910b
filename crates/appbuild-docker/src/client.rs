//! Docker client wrapper

use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use tracing::debug;

use crate::container::{ContainerManager, ContainerSpec};
use crate::error::{DockerError, Result};
use crate::image::ImageManager;
use crate::service::{ContainerRuntime, LogStream};
use crate::types::ImageBuildContext;

/// Docker service configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Socket path (None for default)
    pub socket_path: Option<String>,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self { socket_path: None, timeout: Duration::from_secs(120) }
    }
}

/// Container runtime backed by the Docker daemon
#[derive(Clone)]
pub struct DockerService {
    client: Docker,
}

impl DockerService {
    /// Connect to the daemon and verify it answers
    pub async fn new(config: DockerConfig) -> Result<Self> {
        let client = match &config.socket_path {
            Some(path) => Docker::connect_with_socket(
                path,
                config.timeout.as_secs(),
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(DockerError::Client)?;

        // Test connection
        client.ping().await.map_err(DockerError::Client)?;
        debug!("Connected to Docker daemon");

        Ok(Self { client })
    }

    /// Get the underlying Docker client
    pub fn client(&self) -> &Docker {
        &self.client
    }
}

#[async_trait]
impl ContainerRuntime for DockerService {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        ImageManager::new(&self.client).exists(image).await
    }

    async fn build_image(&self, context: &ImageBuildContext, tag: &str) -> Result<()> {
        ImageManager::new(&self.client).build(context, tag).await
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        ContainerManager::new(&self.client).run(spec).await
    }

    async fn container_logs(&self, container: &str) -> Result<LogStream> {
        Ok(ContainerManager::new(&self.client).logs(container))
    }

    async fn wait_container(&self, container: &str) -> Result<i64> {
        ContainerManager::new(&self.client).wait(container).await
    }

    async fn stop_container(&self, container: &str, grace: Duration) -> Result<()> {
        ContainerManager::new(&self.client).stop(container, grace).await
    }

    async fn kill_container(&self, container: &str) -> Result<()> {
        ContainerManager::new(&self.client).kill(container).await
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        ContainerManager::new(&self.client).remove(container, true).await
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<String>> {
        ContainerManager::new(&self.client).list(label).await
    }
}
