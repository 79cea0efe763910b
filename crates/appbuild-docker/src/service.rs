//! Container runtime trait

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::container::ContainerSpec;
use crate::error::Result;
use crate::types::ImageBuildContext;

/// Chunk of output from a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Standard output chunk
    Stdout(String),
    /// Standard error chunk
    Stderr(String),
}

/// Stream of container output chunks, ending when the container exits
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogOutput>> + Send>>;

/// Execution environment for build containers
///
/// Containers are addressed by the id returned from [`run_container`] or by
/// the name in their [`ContainerSpec`]; the daemon accepts either.
///
/// [`run_container`]: ContainerRuntime::run_container
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build an image from a Dockerfile
    async fn build_image(&self, context: &ImageBuildContext, tag: &str) -> Result<()>;

    /// Create and start a container, returning its id
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Follow container output from the start
    async fn container_logs(&self, container: &str) -> Result<LogStream>;

    /// Wait for the container to exit and return its exit code
    async fn wait_container(&self, container: &str) -> Result<i64>;

    /// Ask the container to stop, letting the daemon kill it after `grace`
    async fn stop_container(&self, container: &str, grace: Duration) -> Result<()>;

    /// Kill the container unconditionally
    async fn kill_container(&self, container: &str) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, container: &str) -> Result<()>;

    /// List the names of containers carrying `label`
    async fn list_containers(&self, label: &str) -> Result<Vec<String>>;
}
