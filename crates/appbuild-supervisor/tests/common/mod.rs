//! Shared test fixtures: a scripted in-memory container runtime and helpers
//! for collecting progress events

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use appbuild_config::Config;
use appbuild_core::{BuildMode, BuildOptions, BuildProgress, BuildType};
use appbuild_docker::{
    ContainerRuntime, ContainerSpec, DockerError, ImageBuildContext, LogOutput, LogStream,
    Result,
};
use appbuild_supervisor::{BuildRegistry, ChannelSink, RegistrySettings};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// Exit code reported after a graceful stop
pub const STOPPED_EXIT_CODE: i64 = 143;

/// Exit code reported after a kill
pub const KILLED_EXIT_CODE: i64 = 137;

/// Scripted behaviour of one mock container
#[derive(Debug, Clone)]
pub struct Script {
    /// Output chunks, each emitted after its delay
    pub output: Vec<(Duration, LogOutput)>,
    /// Time the process keeps running after its last output
    pub linger: Duration,
    pub exit_code: i64,
    /// Graceful stop requests are ignored
    pub ignore_stop: bool,
    /// File written into the output mount on natural exit
    pub artifact: Option<(String, usize)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            output: Vec::new(),
            linger: Duration::from_millis(50),
            exit_code: 0,
            ignore_stop: false,
            artifact: None,
        }
    }
}

impl Script {
    /// Typical successful build of `build_id` producing a package artifact
    pub fn successful(build_id: &str) -> Self {
        Self::default()
            .stdout("Installing dependencies\n")
            .stdout("Starting build for android\n")
            .stdout("> Task :app:compileReleaseKotlin\n")
            .stdout("Compiling native modules\n")
            .stdout("Signing package\n")
            .with_artifact(format!("{build_id}-app.apk"), 1024)
    }

    /// Process that keeps running for `duration` without progress output
    pub fn long_running(duration: Duration) -> Self {
        Self { linger: duration, ..Self::default() }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.output.push((Duration::from_millis(5), LogOutput::Stdout(text.to_string())));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.output.push((Duration::from_millis(5), LogOutput::Stderr(text.to_string())));
        self
    }

    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, size: usize) -> Self {
        self.artifact = Some((name.into(), size));
        self
    }

    pub fn ignoring_stop(mut self) -> Self {
        self.ignore_stop = true;
        self
    }

    fn run_time(&self) -> Duration {
        self.output.iter().map(|(delay, _)| *delay).sum::<Duration>() + self.linger
    }
}

struct MockContainer {
    spec: ContainerSpec,
    script: Script,
    exit: Arc<watch::Sender<Option<i64>>>,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    scripts: HashMap<String, Script>,
    operations: Vec<String>,
    specs: Vec<ContainerSpec>,
}

/// In-memory container runtime driven by per-build scripts
///
/// Containers are keyed by name and the name doubles as their id.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    image_missing: Arc<AtomicBool>,
    fail_image_build: Arc<AtomicBool>,
    fail_run: Arc<AtomicBool>,
    image_build_delay: Arc<Mutex<Duration>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the container of `build_id`
    pub fn script(&self, build_id: &str, script: Script) {
        self.state.lock().unwrap().scripts.insert(build_id.to_string(), script);
    }

    pub fn set_image_missing(&self, missing: bool) {
        self.image_missing.store(missing, Ordering::SeqCst);
    }

    pub fn set_fail_image_build(&self, fail: bool) {
        self.fail_image_build.store(fail, Ordering::SeqCst);
    }

    pub fn set_image_build_delay(&self, delay: Duration) {
        *self.image_build_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.fail_run.store(fail, Ordering::SeqCst);
    }

    /// Operations performed so far, as `op:target`
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.operations().iter().filter(|o| o.starts_with(&prefix)).count()
    }

    /// Specs of every container started
    pub fn started_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    /// Names of containers not yet removed
    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    fn record(&self, op: &str, target: &str) {
        self.state.lock().unwrap().operations.push(format!("{op}:{target}"));
    }

    fn exit_receiver(&self, container: &str) -> Result<(watch::Receiver<Option<i64>>, Script)> {
        let state = self.state.lock().unwrap();
        let entry = state
            .containers
            .get(container)
            .ok_or_else(|| DockerError::ContainerNotFound { id: container.to_string() })?;
        Ok((entry.exit.subscribe(), entry.script.clone()))
    }

    fn set_exit(&self, container: &str, code: i64) -> Result<()> {
        let state = self.state.lock().unwrap();
        let entry = state
            .containers
            .get(container)
            .ok_or_else(|| DockerError::ContainerNotFound { id: container.to_string() })?;
        entry.exit.send_if_modified(|exit| {
            if exit.is_none() {
                *exit = Some(code);
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

async fn exited(exit: &mut watch::Receiver<Option<i64>>) {
    let _ = exit.wait_for(|code| code.is_some()).await;
}

fn output_mount(spec: &ContainerSpec) -> Option<PathBuf> {
    spec.volumes
        .iter()
        .find(|v| v.container_path == "/output")
        .map(|v| v.host_path.clone())
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record("image_exists", image);
        Ok(!self.image_missing.load(Ordering::SeqCst))
    }

    async fn build_image(&self, _context: &ImageBuildContext, tag: &str) -> Result<()> {
        self.record("build_image", tag);
        let delay = *self.image_build_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.fail_image_build.load(Ordering::SeqCst) {
            return Err(DockerError::BuildFailed { reason: "step 3/7 failed".to_string() });
        }
        self.image_missing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("run", &spec.name);
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(DockerError::ExecutionFailed { reason: "no such image".to_string() });
        }

        let build_id = spec.environment.get("BUILD_ID").cloned().unwrap_or_default();
        let (exit, _) = watch::channel(None);
        let exit = Arc::new(exit);

        let script = {
            let mut state = self.state.lock().unwrap();
            let script = state.scripts.get(&build_id).cloned().unwrap_or_default();
            state.specs.push(spec.clone());
            state.containers.insert(
                spec.name.clone(),
                MockContainer {
                    spec: spec.clone(),
                    script: script.clone(),
                    exit: Arc::clone(&exit),
                },
            );
            script
        };

        // Natural completion
        let output_dir = output_mount(spec);
        tokio::spawn(async move {
            tokio::time::sleep(script.run_time()).await;
            if exit.borrow().is_some() {
                return;
            }
            if let (Some((name, size)), Some(dir)) = (&script.artifact, output_dir) {
                if script.exit_code == 0 {
                    let _ = std::fs::write(dir.join(name), vec![0u8; *size]);
                }
            }
            exit.send_if_modified(|code| {
                if code.is_none() {
                    *code = Some(script.exit_code);
                    true
                } else {
                    false
                }
            });
        });

        Ok(spec.name.clone())
    }

    async fn container_logs(&self, container: &str) -> Result<LogStream> {
        self.record("logs", container);
        let (exit, script) = self.exit_receiver(container)?;
        let chunks: VecDeque<(Duration, LogOutput)> = script.output.into_iter().collect();

        let stream = futures::stream::unfold((chunks, exit), |(mut chunks, mut exit)| async move {
            let (delay, chunk) = chunks.pop_front()?;
            tokio::select! {
                _ = tokio::time::sleep(delay) => Some((Ok(chunk), (chunks, exit))),
                _ = exited(&mut exit) => None,
            }
        });

        Ok(Box::pin(stream))
    }

    async fn wait_container(&self, container: &str) -> Result<i64> {
        self.record("wait", container);
        let (mut exit, _) = self.exit_receiver(container)?;
        exited(&mut exit).await;
        let code = *exit.borrow();
        code.ok_or_else(|| DockerError::ContainerNotFound { id: container.to_string() })
    }

    async fn stop_container(&self, container: &str, _grace: Duration) -> Result<()> {
        self.record("stop", container);
        let (_, script) = self.exit_receiver(container)?;
        if !script.ignore_stop {
            self.set_exit(container, STOPPED_EXIT_CODE)?;
        }
        Ok(())
    }

    async fn kill_container(&self, container: &str) -> Result<()> {
        self.record("kill", container);
        self.set_exit(container, KILLED_EXIT_CODE)
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.record("remove", container);
        let removed = self.state.lock().unwrap().containers.remove(container);
        match removed {
            Some(entry) => {
                // Removal of a running container kills it
                entry.exit.send_if_modified(|code| {
                    if code.is_none() {
                        *code = Some(KILLED_EXIT_CODE);
                        true
                    } else {
                        false
                    }
                });
                Ok(())
            }
            None => Err(DockerError::ContainerNotFound { id: container.to_string() }),
        }
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<String>> {
        self.record("list", label);
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| c.spec.labels.contains_key(label))
            .map(|c| c.spec.name.clone())
            .collect())
    }
}

/// Registry wired to a mock runtime, with temporary project and output dirs
pub struct Harness {
    pub runtime: MockRuntime,
    pub registry: BuildRegistry,
    pub events: mpsc::UnboundedReceiver<BuildProgress>,
    pub temp_dir: TempDir,
    /// Received events of other builds, kept for later waits
    backlog: VecDeque<BuildProgress>,
}

pub const TEST_GRACE: Duration = Duration::from_millis(200);

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let runtime = MockRuntime::new();
        let (sink, events) = ChannelSink::channel();
        let registry = BuildRegistry::builder(Arc::new(runtime.clone()))
            .config(config)
            .settings(RegistrySettings { default_timeout_ms: 30_000, grace_period: TEST_GRACE })
            .sink(Arc::new(sink))
            .build();

        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("project")).unwrap();

        Self { runtime, registry, events, temp_dir, backlog: VecDeque::new() }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    pub fn output_dir(&self, build_id: &str) -> PathBuf {
        self.temp_dir.path().join("output").join(build_id)
    }

    pub fn options(&self, build_id: &str) -> BuildOptions {
        BuildOptions::new(
            build_id,
            BuildType::Package,
            BuildMode::Release,
            "demo",
            self.project_dir(),
            self.output_dir(build_id),
        )
    }

    /// Events of `build_id` up to and including its terminal event
    ///
    /// Events of other builds seen on the way are kept, in order, for later
    /// calls.
    pub async fn events_until_terminal(&mut self, build_id: &str) -> Vec<BuildProgress> {
        let mut collected = Vec::new();
        let mut skipped = VecDeque::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => tokio::time::timeout_at(deadline, self.events.recv())
                    .await
                    .expect("timed out waiting for terminal event")
                    .expect("event channel closed"),
            };
            if event.build_id != build_id {
                skipped.push_back(event);
                continue;
            }

            let done = event.is_terminal();
            collected.push(event);
            if done {
                skipped.extend(self.backlog.drain(..));
                self.backlog = skipped;
                return collected;
            }
        }
    }

    /// Kept events plus whatever arrives within `window`
    pub async fn drain_for(&mut self, window: Duration) -> Vec<BuildProgress> {
        let mut collected: Vec<BuildProgress> = self.backlog.drain(..).collect();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            collected.push(event);
        }
        collected
    }
}

/// Events of one build, in order
pub fn for_build<'a>(events: &'a [BuildProgress], build_id: &str) -> Vec<&'a BuildProgress> {
    events.iter().filter(|e| e.build_id == build_id).collect()
}

pub fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, vec![0u8; size]).unwrap();
    path
}
