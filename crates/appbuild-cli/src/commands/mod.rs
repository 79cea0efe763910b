//! CLI command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use appbuild_config::Config;
use appbuild_docker::{DockerConfig, DockerService};
use color_eyre::eyre::{Context, Result};
use tracing::debug;

pub mod build;
pub mod clean;
pub mod image;
pub mod init;
pub mod validate;

pub use build::BuildCommand;
pub use clean::CleanCommand;
pub use image::ImageCommand;
pub use init::InitCommand;
pub use validate::ValidateCommand;

/// Configuration file used when `--config` is not given
pub const DEFAULT_CONFIG: &str = "appbuild.yaml";

/// Load the configuration
///
/// An explicit path must exist; without one, `appbuild.yaml` in the current
/// directory is used if present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                debug!("No {} found, using defaults", DEFAULT_CONFIG);
                return Ok(Config::default());
            }
            default
        }
    };

    Config::from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Connect to the container daemon named in the configuration
pub async fn connect(config: &Config) -> Result<DockerService> {
    let docker_config = DockerConfig {
        socket_path: config.docker.socket.clone(),
        timeout: Duration::from_secs(config.docker.connect_timeout_secs),
    };

    DockerService::new(docker_config).await.context("Failed to connect to Docker daemon")
}
