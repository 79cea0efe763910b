//! Init command implementation

use std::path::PathBuf;

use appbuild_config::Config;
use color_eyre::eyre::{bail, Context, Result};
use tracing::info;

/// Init command implementation
pub struct InitCommand {
    output_path: PathBuf,
    force: bool,
}

impl InitCommand {
    pub fn new(output_path: PathBuf, force: bool) -> Self {
        Self { output_path, force }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Initializing configuration file at {}", self.output_path.display());

        if self.output_path.exists() && !self.force {
            bail!(
                "Configuration file already exists: {}. Use --force to overwrite.",
                self.output_path.display()
            );
        }

        let yaml_content = starter_config()?;

        std::fs::write(&self.output_path, yaml_content)
            .with_context(|| format!("Failed to write config to {}", self.output_path.display()))?;

        println!("✓ Created configuration file: {}", self.output_path.display());
        println!("\nNext steps:");
        println!("1. Point image.dockerfile at the Dockerfile of your build image");
        println!(
            "2. Run 'appbuild validate -c {}' to validate the configuration",
            self.output_path.display()
        );
        println!(
            "3. Run 'appbuild build -c {} --id <ID> --app-name <NAME>' to build",
            self.output_path.display()
        );

        Ok(())
    }
}

fn starter_config() -> Result<String> {
    let body = Config::default().to_yaml().context("Failed to serialize config to YAML")?;
    Ok(format!(
        "# appbuild configuration\n\
         # Paths may reference environment variables as $VAR or ${{VAR}}.\n\
         {body}"
    ))
}
