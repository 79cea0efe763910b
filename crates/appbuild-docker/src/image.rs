//! Docker image management

use std::collections::HashMap;
use std::path::Path;

use bollard::image::{BuildImageOptions, ListImagesOptions};
use futures::StreamExt;
use tar::Builder;
use tracing::{debug, info};

use crate::error::{DockerError, Result};
use crate::types::ImageBuildContext;

/// Docker image manager
pub struct ImageManager<'a> {
    client: &'a bollard::Docker,
}

impl<'a> ImageManager<'a> {
    /// Create a new image manager
    pub fn new(client: &'a bollard::Docker) -> Self {
        Self { client }
    }

    /// Check if image exists locally
    pub async fn exists(&self, image: &str) -> Result<bool> {
        let filters = HashMap::from([("reference", vec![image])]);
        let options = ListImagesOptions { all: false, filters, ..Default::default() };

        let images = self
            .client
            .list_images(Some(options))
            .await
            .map_err(DockerError::Client)?;

        Ok(!images.is_empty())
    }

    /// Build image from a Dockerfile and its context directory
    pub async fn build(&self, context: &ImageBuildContext, tag: &str) -> Result<()> {
        info!("Building Docker image: {}", tag);

        let tar_data = archive_context(&context.context_dir)?;

        let build_args: HashMap<&str, &str> = context
            .build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let labels: HashMap<&str, &str> = context
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let options = BuildImageOptions {
            t: tag,
            dockerfile: context.dockerfile.as_str(),
            buildargs: build_args,
            labels,
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(tar_data.into()));

        while let Some(info) = stream.next().await {
            match info {
                Ok(output) => {
                    if let Some(stream) = output.stream {
                        let line = stream.trim();
                        if !line.is_empty() {
                            debug!("Image build: {}", line);
                        }
                    }
                    if let Some(error) = output.error {
                        return Err(DockerError::BuildFailed { reason: error });
                    }
                }
                Err(e) => {
                    return Err(DockerError::BuildFailed { reason: e.to_string() });
                }
            }
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }
}

/// Pack a build context directory into an in-memory tar archive
pub fn archive_context(context_dir: &Path) -> Result<Vec<u8>> {
    if !context_dir.is_dir() {
        return Err(DockerError::BuildFailed {
            reason: format!("Build context is not a directory: {}", context_dir.display()),
        });
    }

    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", context_dir)
        .map_err(|e| DockerError::BuildFailed {
            reason: format!("Failed to archive build context: {e}"),
        })?;

    builder.into_inner().map_err(|e| DockerError::BuildFailed {
        reason: format!("Failed to finish tar archive: {e}"),
    })
}
