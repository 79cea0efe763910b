//! Process supervision: one isolated build container per job

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use appbuild_config::Config;
use appbuild_core::BuildOptions;
use appbuild_docker::{
    ContainerRuntime, ContainerSpec, LogOutput, ResourceLimits, VolumeMount, MANAGED_LABEL,
};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{BuildError, Result};
use crate::progress::{Classification, LineBuffer, ProgressClassifier};

/// Mount point of the project tree inside the build container
pub const PROJECT_MOUNT: &str = "/project";

/// Mount point of the output directory inside the build container
pub const OUTPUT_MOUNT: &str = "/output";

/// Label carrying the build id on supervised containers
pub const BUILD_ID_LABEL: &str = "appbuild.build-id";

/// How long the log stream may lag behind the container's exit
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded tail of a text stream, measured in characters
#[derive(Debug, Clone)]
pub struct LogTail {
    max_chars: usize,
    text: String,
}

impl LogTail {
    /// Create an empty tail keeping at most `max_chars` characters
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars, text: String::new() }
    }

    /// Append a chunk, dropping the oldest characters beyond the bound
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);

        let excess = self.text.chars().count().saturating_sub(self.max_chars);
        if excess > 0 {
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
        }
    }

    /// Current tail contents
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the tail
    pub fn into_string(self) -> String {
        self.text
    }
}

/// Outcome of a supervised build process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub exit_code: i64,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl ProcessExit {
    /// Check if the process exited cleanly
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches build containers with fixed image and resource ceilings
pub struct ProcessSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    limits: ResourceLimits,
    log_tail_chars: usize,
}

impl ProcessSupervisor {
    /// Create a new process supervisor
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        limits: ResourceLimits,
        log_tail_chars: usize,
    ) -> Self {
        Self { runtime, image: image.into(), limits, log_tail_chars }
    }

    /// Create a supervisor from the image and resource configuration
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        let limits = ResourceLimits {
            memory: Some(config.memory_bytes()),
            nano_cpus: Some(config.nano_cpus()),
            network_mode: Some(config.resources.network.clone()),
        };

        Self::new(runtime, config.image.tag.clone(), limits, config.build.log_tail_chars)
    }

    /// Container specification for a job
    ///
    /// The project is mounted read-only and the output directory read-write;
    /// build parameters travel as environment variables.
    pub fn container_spec(&self, options: &BuildOptions, container_name: &str) -> ContainerSpec {
        ContainerSpec::new(container_name, self.image.clone())
            .with_volume(mount(&options.project_path, PROJECT_MOUNT, true))
            .with_volume(mount(&options.output_path, OUTPUT_MOUNT, false))
            .with_working_dir(PROJECT_MOUNT)
            .with_env("BUILD_ID", options.build_id.clone())
            .with_env("BUILD_TYPE", options.build_type.as_str())
            .with_env("BUILD_MODE", options.build_mode.as_str())
            .with_env("APP_NAME", options.app_name.clone())
            .with_env("OUTPUT_DIR", OUTPUT_MOUNT)
            .with_label(MANAGED_LABEL, "true")
            .with_label(BUILD_ID_LABEL, options.build_id.clone())
            .with_limits(self.limits.clone())
    }

    /// Start the build container for a job
    ///
    /// `exited` is flipped to `true` once the container has stopped running.
    pub async fn launch(
        &self,
        options: &BuildOptions,
        container_name: &str,
        exited: watch::Sender<bool>,
    ) -> Result<BuildProcess> {
        let spec = self.container_spec(options, container_name);

        let container_id = self
            .runtime
            .run_container(&spec)
            .await
            .map_err(|e| BuildError::launch(e.to_string()))?;

        info!("Build {} running in container {}", options.build_id, container_name);

        Ok(BuildProcess {
            runtime: Arc::clone(&self.runtime),
            build_id: options.build_id.clone(),
            container_id,
            log_tail_chars: self.log_tail_chars,
            exited,
        })
    }
}

fn mount(host_path: &Path, container_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        host_path: host_path.to_path_buf(),
        container_path: container_path.to_string(),
        read_only,
    }
}

/// Handle to a running build container
///
/// Owned by the job's lifecycle task until the container has exited and been
/// removed.
pub struct BuildProcess {
    runtime: Arc<dyn ContainerRuntime>,
    build_id: String,
    container_id: String,
    log_tail_chars: usize,
    exited: watch::Sender<bool>,
}

impl BuildProcess {
    /// Daemon id of the container
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Kill the container without waiting for it
    pub async fn kill(&self) {
        if let Err(e) = self.runtime.kill_container(&self.container_id).await {
            warn!("Failed to kill container {}: {}", self.container_id, e);
        }
    }

    /// Stream output until the container exits, then remove it
    ///
    /// Every complete output line is passed through `classifier`; recognised
    /// progress goes to `on_progress`. The last `log_tail_chars` characters of
    /// each stream are kept for diagnostics.
    pub async fn supervise<F>(
        self,
        classifier: &dyn ProgressClassifier,
        mut on_progress: F,
    ) -> Result<ProcessExit>
    where
        F: FnMut(Classification) + Send,
    {
        let mut stdout_tail = LogTail::new(self.log_tail_chars);
        let mut stderr_tail = LogTail::new(self.log_tail_chars);

        let exit = {
            let logs = async {
                let mut stdout_lines = LineBuffer::default();
                let mut stderr_lines = LineBuffer::default();
                let mut handle_line = |line: &str| {
                    debug!("[{}] {}", self.build_id, line);
                    if let Some(classification) = classifier.classify(line) {
                        on_progress(classification);
                    }
                };

                match self.runtime.container_logs(&self.container_id).await {
                    Ok(mut stream) => {
                        while let Some(chunk) = stream.next().await {
                            match chunk {
                                Ok(LogOutput::Stdout(text)) => {
                                    stdout_tail.push(&text);
                                    for line in stdout_lines.push(&text) {
                                        handle_line(&line);
                                    }
                                }
                                Ok(LogOutput::Stderr(text)) => {
                                    stderr_tail.push(&text);
                                    for line in stderr_lines.push(&text) {
                                        handle_line(&line);
                                    }
                                }
                                Err(e) => {
                                    warn!("Log stream for build {} failed: {}", self.build_id, e);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Cannot follow logs of build {}: {}", self.build_id, e),
                }

                for rest in [stdout_lines.finish(), stderr_lines.finish()].into_iter().flatten() {
                    handle_line(&rest);
                }
            };

            let wait = async {
                let result = self.runtime.wait_container(&self.container_id).await;
                self.exited.send_replace(true);
                result
            };

            tokio::pin!(logs);
            tokio::pin!(wait);

            let mut logs_done = false;
            let exit = loop {
                tokio::select! {
                    _ = &mut logs, if !logs_done => logs_done = true,
                    exit = &mut wait => break exit,
                }
            };

            if !logs_done && tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut logs).await.is_err() {
                warn!("Log stream of build {} still open after exit", self.build_id);
            }

            exit
        };

        if let Err(e) = self.runtime.remove_container(&self.container_id).await {
            if !e.is_not_found() {
                warn!("Failed to remove container {}: {}", self.container_id, e);
            }
        }

        let exit_code = exit.map_err(BuildError::Docker)?;
        debug!("Build {} exited with code {}", self.build_id, exit_code);

        Ok(ProcessExit {
            exit_code,
            stdout_tail: stdout_tail.into_string(),
            stderr_tail: stderr_tail.into_string(),
        })
    }
}

impl Drop for BuildProcess {
    fn drop(&mut self) {
        // Waiters must never outlive the handle
        self.exited.send_replace(true);
    }
}
