//! Build image provisioning

use std::sync::Arc;

use appbuild_config::Config;
use appbuild_docker::{ContainerRuntime, ImageBuildContext};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BuildError, Result};

/// Makes sure the build image exists before a container is launched
pub struct ImageProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    tag: String,
    build_context: Option<ImageBuildContext>,
    /// Serialises check-then-build so concurrent jobs build the image once
    guard: Mutex<()>,
}

impl ImageProvisioner {
    /// Create a provisioner for `tag`, optionally able to build it
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tag: impl Into<String>,
        build_context: Option<ImageBuildContext>,
    ) -> Self {
        Self { runtime, tag: tag.into(), build_context, guard: Mutex::new(()) }
    }

    /// Create a provisioner from the image section of the configuration
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        let build_context = config.image.dockerfile.as_ref().and_then(|dockerfile| {
            let context_dir = config.image.build_context_dir()?;
            let relative = dockerfile
                .strip_prefix(&context_dir)
                .unwrap_or(dockerfile.as_path())
                .to_string_lossy()
                .into_owned();
            Some(ImageBuildContext::new(context_dir).with_dockerfile(relative))
        });

        Self::new(runtime, config.image.tag.clone(), build_context)
    }

    /// Image tag the build containers run
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Check whether the image is present locally
    pub async fn check_image_available(&self) -> Result<bool> {
        self.runtime
            .image_exists(&self.tag)
            .await
            .map_err(|e| BuildError::provisioning(format!("failed to inspect images: {e}")))
    }

    /// Build the image from its Dockerfile
    pub async fn build_image(&self) -> Result<()> {
        let Some(context) = &self.build_context else {
            return Err(BuildError::provisioning(format!(
                "image {} is missing and no Dockerfile is configured",
                self.tag
            )));
        };

        info!("Building image {} from {}", self.tag, context.context_dir.display());
        self.runtime.build_image(context, &self.tag).await.map_err(|e| {
            warn!("Image build for {} failed: {}", self.tag, e);
            BuildError::provisioning(e.to_string())
        })
    }

    /// Build the image if it is not available yet
    pub async fn ensure_image(&self) -> Result<()> {
        let _guard = self.guard.lock().await;

        if self.check_image_available().await? {
            debug!("Image {} already exists locally", self.tag);
            return Ok(());
        }

        info!("Image {} not found locally, building", self.tag);
        self.build_image().await
    }
}
