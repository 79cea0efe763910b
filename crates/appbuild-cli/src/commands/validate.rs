//! Validate command implementation

use std::path::PathBuf;

use appbuild_docker::ContainerRuntime;
use color_eyre::eyre::{Context, Result};
use tracing::{info, warn};

use super::{connect, load_config};

/// Validate command implementation
pub struct ValidateCommand {
    config_path: Option<PathBuf>,
    check_docker: bool,
}

impl ValidateCommand {
    pub fn new(config_path: Option<PathBuf>, check_docker: bool) -> Self {
        Self { config_path, check_docker }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Validating configuration");

        let config = load_config(self.config_path.as_deref())?;
        config.validate().context("Invalid configuration")?;

        println!("✓ Configuration loaded successfully");
        println!("  Image: {}", config.image.tag);
        match &config.image.dockerfile {
            Some(dockerfile) => println!("  Dockerfile: {}", dockerfile.display()),
            None => warn!("No Dockerfile configured, a missing image cannot be built"),
        }
        println!(
            "  Resources: {} CPUs, {} MiB memory, network {}",
            config.resources.cpus, config.resources.memory_mb, config.resources.network
        );
        println!(
            "  Default timeout: {}ms, grace period: {}s",
            config.build.default_timeout_ms, config.build.grace_period_secs
        );

        if self.check_docker {
            info!("Checking Docker availability");
            let runtime = connect(&config).await?;
            println!("✓ Docker is available");

            if runtime.image_exists(&config.image.tag).await? {
                println!("✓ Image {} is available", config.image.tag);
            } else {
                warn!("Image {} not found locally, it will be built on first use", config.image.tag);
            }
        }

        println!("\n✓ All validation checks passed!");
        Ok(())
    }
}
