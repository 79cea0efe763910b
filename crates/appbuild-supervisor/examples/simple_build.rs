//! Example of running a single build through the registry

use std::sync::Arc;

use appbuild_config::Config;
use appbuild_core::{BuildMode, BuildOptions, BuildType};
use appbuild_docker::{DockerConfig, DockerService};
use appbuild_supervisor::{BuildRegistry, ChannelSink, FanoutSink, LogSink};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let docker = match DockerService::new(DockerConfig::default()).await {
        Ok(docker) => docker,
        Err(e) => {
            eprintln!("Failed to connect to Docker: {e}");
            eprintln!("Make sure Docker is installed and running");
            return Ok(());
        }
    };

    // Log every event and also keep them for the summary below
    let (channel, mut events) = ChannelSink::channel();
    let sink = FanoutSink::new().with(Arc::new(LogSink)).with(Arc::new(channel));
    let registry = BuildRegistry::new(Arc::new(docker), Config::default(), Arc::new(sink));

    let options = BuildOptions::new(
        "example-1",
        BuildType::Package,
        BuildMode::Debug,
        "example",
        "./test_project",
        "./output",
    )
    .with_timeout_ms(15 * 60 * 1000);

    info!("Starting build {}", options.build_id);
    registry.start_build(options)?;

    while let Some(event) = events.recv().await {
        if event.is_terminal() {
            match (&event.output_path, &event.error) {
                (Some(path), _) => info!("Artifact: {} ({:?} bytes)", path.display(), event.size_bytes),
                (_, Some(error)) => eprintln!("Build {}: {error}", event.status),
                _ => {}
            }
            break;
        }
    }

    registry.cleanup().await;
    Ok(())
}
