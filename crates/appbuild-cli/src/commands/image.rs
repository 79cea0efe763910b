//! Image command implementation

use std::path::PathBuf;
use std::sync::Arc;

use appbuild_supervisor::ImageProvisioner;
use color_eyre::eyre::{Context, Result};
use tracing::info;

use super::{connect, load_config};

/// Image command implementation
pub struct ImageCommand {
    config_path: Option<PathBuf>,
    rebuild: bool,
}

impl ImageCommand {
    pub fn new(config_path: Option<PathBuf>, rebuild: bool) -> Self {
        Self { config_path, rebuild }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = load_config(self.config_path.as_deref())?;
        let runtime = Arc::new(connect(&config).await?);
        let provisioner = ImageProvisioner::from_config(runtime, &config);
        let tag = provisioner.tag().to_string();

        if self.rebuild {
            info!("Rebuilding image {}", tag);
            provisioner
                .build_image()
                .await
                .with_context(|| format!("Failed to build image {tag}"))?;
            println!("✓ Built image {tag}");
            return Ok(());
        }

        if provisioner.check_image_available().await? {
            println!("✓ Image {tag} is available");
            return Ok(());
        }

        provisioner
            .ensure_image()
            .await
            .with_context(|| format!("Image {tag} is missing and could not be built"))?;
        println!("✓ Built image {tag}");

        Ok(())
    }
}
