//! Main CLI entry point for the appbuild build supervisor

use std::path::PathBuf;

use appbuild_core::{BuildMode, BuildOptions, BuildType};
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

mod commands;

/// appbuild - Build mobile application artifacts in isolated containers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Configuration file path (global option)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build one artifact from a project directory
    Build {
        /// Unique build identifier
        #[arg(long, value_name = "ID")]
        id: String,

        /// Artifact kind (package, bundle, source-archive, ios-package)
        #[arg(long = "type", value_name = "TYPE", default_value = "package")]
        build_type: BuildType,

        /// Compilation mode (debug, release)
        #[arg(long, value_name = "MODE", default_value = "debug")]
        mode: BuildMode,

        /// Application name passed to the toolchain
        #[arg(long, value_name = "NAME")]
        app_name: String,

        /// Project directory
        #[arg(long, value_name = "DIR", default_value = ".")]
        project: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = "output")]
        output: PathBuf,

        /// Deadline in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Check the build image, building it if missing
    Image {
        /// Build the image even if it exists
        #[arg(long)]
        rebuild: bool,
    },

    /// Validate configuration file
    Validate {
        /// Check Docker availability
        #[arg(long)]
        check_docker: bool,
    },

    /// Remove leftover build containers
    Clean,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, value_name = "FILE", default_value = commands::DEFAULT_CONFIG)]
        output: PathBuf,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet)?;

    let config_path = cli.config;

    let result = match cli.command {
        Commands::Build {
            id,
            build_type,
            mode,
            app_name,
            project,
            output,
            timeout_ms,
            json,
        } => {
            let mut options = BuildOptions::new(id, build_type, mode, app_name, project, output);
            options.timeout_ms = timeout_ms;
            let command = commands::BuildCommand::new(config_path, options, json);
            command.execute().await
        }

        Commands::Image { rebuild } => {
            let command = commands::ImageCommand::new(config_path, rebuild);
            command.execute().await
        }

        Commands::Validate { check_docker } => {
            let command = commands::ValidateCommand::new(config_path, check_docker);
            command.execute().await
        }

        Commands::Clean => {
            let command = commands::CleanCommand::new(config_path);
            command.execute().await
        }

        Commands::Init { output, force } => {
            let command = commands::InitCommand::new(output, force);
            command.execute().await
        }
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn setup_logging(verbose: u8, quiet: u8) -> Result<()> {
    let log_level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (_, 0) => "trace",
        (0, 1) => "warn",
        (0, 2) => "error",
        (0, _) => "off",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
