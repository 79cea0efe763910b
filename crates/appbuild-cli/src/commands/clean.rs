//! Clean command implementation

use std::path::PathBuf;

use appbuild_docker::{ContainerRuntime, MANAGED_LABEL};
use color_eyre::eyre::{Context, Result};
use tracing::{info, warn};

use super::{connect, load_config};

/// Clean command implementation
pub struct CleanCommand {
    config_path: Option<PathBuf>,
}

impl CleanCommand {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Cleaning leftover build containers");

        let config = load_config(self.config_path.as_deref())?;
        let runtime = connect(&config).await?;

        let removed = remove_managed_containers(&runtime).await?;
        if removed == 0 {
            println!("  No leftover build containers found");
        } else {
            println!("  Removed {removed} build containers");
        }

        println!("✓ Cleanup completed");
        Ok(())
    }
}

/// Force-remove every container carrying the managed label
async fn remove_managed_containers(runtime: &dyn ContainerRuntime) -> Result<usize> {
    let containers = runtime
        .list_containers(MANAGED_LABEL)
        .await
        .context("Failed to list build containers")?;

    let mut removed = 0;
    for name in containers {
        match runtime.remove_container(&name).await {
            Ok(()) => {
                println!("  Removed container {name}");
                removed += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }

    Ok(removed)
}
