//! Build command implementation

use std::path::PathBuf;
use std::sync::Arc;

use appbuild_core::{BuildOptions, BuildProgress, BuildStatus};
use appbuild_supervisor::{BuildRegistry, CancelReason, ChannelSink};
use color_eyre::eyre::{bail, eyre, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::{connect, load_config};

/// Build command implementation
pub struct BuildCommand {
    config_path: Option<PathBuf>,
    options: BuildOptions,
    json: bool,
}

impl BuildCommand {
    pub fn new(config_path: Option<PathBuf>, options: BuildOptions, json: bool) -> Self {
        Self { config_path, options, json }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = load_config(self.config_path.as_deref())?;
        let runtime = Arc::new(connect(&config).await?);

        let (sink, mut events) = ChannelSink::channel();
        let registry = BuildRegistry::new(runtime, config, Arc::new(sink));
        let build_id = self.options.build_id.clone();

        info!("Starting build {}", build_id);
        registry.start_build(self.options.clone()).context("Build request rejected")?;

        let renderer = (!self.json).then(|| ProgressRenderer::new(&build_id));
        let mut interrupted = false;

        let terminal = loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        bail!("Progress channel closed before build {build_id} finished");
                    };
                    match &renderer {
                        Some(renderer) => renderer.update(&event),
                        None => println!("{}", event.to_json()?),
                    }
                    if event.is_terminal() {
                        break event;
                    }
                }
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    warn!("Interrupt received, cancelling build {}", build_id);
                    registry.cancel_build(&build_id, CancelReason::UserRequested);
                    interrupted = true;
                }
            }
        };

        match terminal.status {
            BuildStatus::Completed => {
                if !self.json {
                    if let Some(path) = &terminal.output_path {
                        println!("\n✨ Artifact: {}", path.display());
                    }
                }
                Ok(())
            }
            status => Err(eyre!(
                "Build {} {}: {}",
                build_id,
                status,
                terminal.error.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

/// Renders one job's events on a progress bar
struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    fn new(build_id: &str) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{prefix:.bold.dim} {spinner:.green} [{elapsed_precise}] \
             [{wide_bar:.cyan/blue}] {pos:>3}% {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_prefix(build_id.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self { bar }
    }

    fn update(&self, event: &BuildProgress) {
        self.bar.set_position(u64::from(event.progress_percent));

        match (event.status, &event.error) {
            (BuildStatus::Completed, _) => {
                self.bar.finish_with_message(format!("✓ {}", event.message))
            }
            (status, Some(error)) if status.is_terminal() => {
                self.bar.abandon_with_message(format!("✗ {error}"))
            }
            _ => self.bar.set_message(event.message.clone()),
        }
    }
}
