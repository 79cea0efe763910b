//! Build job registry: owns every active job from registration to its
//! terminal event
//!
//! Every terminal transition goes through a single claim: removing the job's
//! entry from the registry while holding the lock. Whoever removes the entry
//! emits the terminal event; any other path that later tries to finish the
//! same job finds nothing and does nothing. Entries carry a sequence number so
//! that a late callback from an earlier job cannot claim a newer job that
//! reused the same build id.
//!
//! A job claimed for termination keeps its id reserved until its terminal
//! event has been emitted, so a restart under the same id cannot overlap the
//! dying process or interleave its events with the predecessor's.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use appbuild_config::Config;
use appbuild_core::{BuildOptions, BuildProgress, BuildStatus};
use appbuild_docker::ContainerRuntime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactLocator;
use crate::cancellation::{CancelReason, CancellationController};
use crate::error::{BuildError, Result};
use crate::job::{BuildJob, JobOutcome};
use crate::progress::{Classification, MarkerClassifier, ProgressClassifier};
use crate::provisioner::ImageProvisioner;
use crate::sink::{LogSink, ProgressSink};
use crate::supervisor::{BuildProcess, ProcessSupervisor};
use crate::timeout::TimeoutController;

/// Registry-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Deadline for jobs that do not carry their own
    pub default_timeout_ms: u64,
    /// Delay between graceful stop and forced kill
    pub grace_period: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: appbuild_core::build::DEFAULT_TIMEOUT_MS,
            grace_period: Duration::from_secs(5),
        }
    }
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout_ms: config.build.default_timeout_ms,
            grace_period: Duration::from_secs(config.build.grace_period_secs),
        }
    }
}

/// Builder for [`BuildRegistry`]
pub struct RegistryBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    config: Config,
    settings: Option<RegistrySettings>,
    classifier: Arc<dyn ProgressClassifier>,
    sink: Arc<dyn ProgressSink>,
}

impl RegistryBuilder {
    /// Use `config` for image, resources and job defaults
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Override the settings derived from the configuration
    pub fn settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ProgressClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> BuildRegistry {
        let settings = self.settings.unwrap_or_else(|| RegistrySettings::from_config(&self.config));
        let runtime = self.runtime;

        BuildRegistry {
            inner: Arc::new(RegistryInner {
                jobs: Mutex::new(JobTable::default()),
                next_seq: AtomicU64::new(1),
                provisioner: ImageProvisioner::from_config(Arc::clone(&runtime), &self.config),
                supervisor: ProcessSupervisor::from_config(Arc::clone(&runtime), &self.config),
                cancellation: CancellationController::new(runtime, settings.grace_period),
                classifier: self.classifier,
                locator: ArtifactLocator::new(),
                sink: self.sink,
                settings,
            }),
        }
    }
}

/// Registry of active build jobs
///
/// Cheap to clone; all clones share the same jobs.
#[derive(Clone)]
pub struct BuildRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    jobs: Mutex<JobTable>,
    next_seq: AtomicU64,
    provisioner: ImageProvisioner,
    supervisor: ProcessSupervisor,
    cancellation: CancellationController,
    classifier: Arc<dyn ProgressClassifier>,
    locator: ArtifactLocator,
    sink: Arc<dyn ProgressSink>,
    settings: RegistrySettings,
}

/// Live jobs plus the ids still reserved by jobs being terminated
#[derive(Default)]
struct JobTable {
    active: HashMap<String, JobEntry>,
    /// Claimed jobs whose terminal event is still pending, by sequence number
    terminating: HashMap<String, u64>,
}

impl JobTable {
    fn is_taken(&self, build_id: &str) -> bool {
        self.active.contains_key(build_id) || self.terminating.contains_key(build_id)
    }

    fn live(&mut self, build_id: &str, seq: u64) -> Option<&mut JobEntry> {
        self.active.get_mut(build_id).filter(|entry| entry.seq == seq)
    }

    /// Remove the entry of job `seq` (any job if `None`)
    fn take(&mut self, build_id: &str, seq: Option<u64>) -> Option<JobEntry> {
        let owned = self
            .active
            .get(build_id)
            .is_some_and(|entry| seq.map_or(true, |seq| seq == entry.seq));
        if owned {
            self.active.remove(build_id)
        } else {
            None
        }
    }

    fn reserve(&mut self, build_id: &str, seq: u64) {
        self.terminating.insert(build_id.to_string(), seq);
    }

    fn release(&mut self, build_id: &str, seq: u64) {
        if self.terminating.get(build_id) == Some(&seq) {
            self.terminating.remove(build_id);
        }
    }
}

struct JobEntry {
    seq: u64,
    job: BuildJob,
    container_name: String,
    exited: watch::Receiver<bool>,
    timeout: Option<TimeoutController>,
}

impl BuildRegistry {
    /// Start building a registry on top of `runtime`
    ///
    /// Defaults: [`Config::default`], [`MarkerClassifier`] and [`LogSink`].
    pub fn builder(runtime: Arc<dyn ContainerRuntime>) -> RegistryBuilder {
        RegistryBuilder {
            runtime,
            config: Config::default(),
            settings: None,
            classifier: Arc::new(MarkerClassifier::default()),
            sink: Arc::new(LogSink),
        }
    }

    /// Create a registry from a configuration, reporting to `sink`
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: Config,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self::builder(runtime).config(config).sink(sink).build()
    }

    pub fn settings(&self) -> RegistrySettings {
        self.inner.settings
    }

    /// Register and start a build job
    ///
    /// Returns once the job is registered and its `starting` event emitted.
    /// Only rejections are returned as errors; every later failure is
    /// reported through the job's terminal event. Must be called from within
    /// a tokio runtime.
    pub fn start_build(&self, options: BuildOptions) -> Result<()> {
        options.validate()?;

        let inner = &self.inner;
        let build_id = options.build_id.clone();
        let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let container_name = format!("appbuild-{build_id}-{seq}");
        let (exited_tx, exited_rx) = watch::channel(false);

        let deadline = options.timeout_or(inner.settings.default_timeout_ms);
        let timeout = {
            let registry = Arc::downgrade(inner);
            let build_id = build_id.clone();
            TimeoutController::arm(deadline, move || on_deadline(registry, &build_id, seq))
        };

        {
            let mut jobs = inner.jobs();
            if jobs.is_taken(&build_id) {
                return Err(BuildError::duplicate(build_id));
            }

            let job = BuildJob::new(options.clone());
            inner.sink.emit(job.snapshot());
            jobs.active.insert(
                build_id.clone(),
                JobEntry {
                    seq,
                    job,
                    container_name: container_name.clone(),
                    exited: exited_rx,
                    timeout: Some(timeout),
                },
            );
        }

        info!("Build {} registered (deadline {:?})", build_id, deadline);
        tokio::spawn(Arc::clone(inner).run_job(options, seq, container_name, exited_tx));

        Ok(())
    }

    /// Cancel an active job
    ///
    /// Returns `false` if no job with that id is active. Termination of the
    /// process and the terminal event happen in the background.
    pub fn cancel_build(&self, build_id: &str, reason: impl Into<CancelReason>) -> bool {
        self.inner.cancel(build_id, None, reason.into()).is_some()
    }

    /// Ids of all active jobs
    ///
    /// Jobs already claimed for termination are not listed, although their
    /// ids stay reserved until the terminal event is out.
    pub fn active_builds(&self) -> BTreeSet<String> {
        self.inner.jobs().active.keys().cloned().collect()
    }

    /// Current state of an active job
    pub fn job_status(&self, build_id: &str) -> Option<BuildProgress> {
        self.inner.jobs().active.get(build_id).map(|entry| entry.job.snapshot())
    }

    pub fn is_active(&self, build_id: &str) -> bool {
        self.inner.jobs().active.contains_key(build_id)
    }

    /// Cancel every active job and wait until all of them are terminated
    pub async fn cleanup(&self) {
        let entries: Vec<(String, JobEntry)> = {
            let mut jobs = self.inner.jobs();
            let entries: Vec<(String, JobEntry)> = jobs.active.drain().collect();
            for (build_id, entry) in &entries {
                jobs.reserve(build_id, entry.seq);
            }
            entries
        };
        if entries.is_empty() {
            return;
        }

        info!("Cleaning up {} active build(s)", entries.len());
        let handles: Vec<JoinHandle<()>> = entries
            .into_iter()
            .map(|(build_id, entry)| {
                Arc::clone(&self.inner).terminate(build_id, entry, CancelReason::Cleanup)
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Termination task failed: {}", e);
            }
        }
    }
}

fn on_deadline(registry: Weak<RegistryInner>, build_id: &str, seq: u64) {
    if let Some(inner) = registry.upgrade() {
        if inner.cancel(build_id, Some(seq), CancelReason::Timeout).is_some() {
            warn!("Build {} exceeded its deadline", build_id);
        }
    }
}

impl RegistryInner {
    fn jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry of job `seq`, making the caller its finisher
    fn claim(&self, build_id: &str, seq: Option<u64>) -> Option<JobEntry> {
        self.jobs().take(build_id, seq)
    }

    fn is_live(&self, build_id: &str, seq: u64) -> bool {
        self.jobs().live(build_id, seq).is_some()
    }

    fn cancel(
        self: &Arc<Self>,
        build_id: &str,
        seq: Option<u64>,
        reason: CancelReason,
    ) -> Option<JoinHandle<()>> {
        let entry = {
            let mut jobs = self.jobs();
            let entry = jobs.take(build_id, seq)?;
            jobs.reserve(build_id, entry.seq);
            entry
        };
        info!("Cancelling build {}: {}", build_id, reason);
        Some(Arc::clone(self).terminate(build_id.to_string(), entry, reason))
    }

    /// Stop the process of a claimed job, then emit its terminal event
    fn terminate(
        self: Arc<Self>,
        build_id: String,
        mut entry: JobEntry,
        reason: CancelReason,
    ) -> JoinHandle<()> {
        if let Some(timeout) = entry.timeout.take() {
            timeout.disarm();
        }

        tokio::spawn(async move {
            let outcome =
                self.cancellation.terminate(&entry.container_name, entry.exited.clone()).await;
            debug!("Build {} terminated: {:?}", build_id, outcome);

            let timeout_ms = entry
                .job
                .options()
                .timeout_ms
                .unwrap_or(self.settings.default_timeout_ms);
            self.finish(entry, JobOutcome::Failed(reason.to_error(timeout_ms)));
        })
    }

    /// Emit the terminal event of a claimed job and release its id
    fn finish(&self, mut entry: JobEntry, outcome: JobOutcome) {
        if let Some(timeout) = entry.timeout.take() {
            timeout.disarm();
        }

        let event = entry.job.finish(outcome).then(|| entry.job.snapshot());
        if let Some(event) = &event {
            match entry.job.status() {
                BuildStatus::Completed => info!(
                    "Build {} completed in {:.1}s",
                    entry.job.build_id(),
                    entry.job.elapsed().as_secs_f64()
                ),
                status => warn!(
                    "Build {} ended as {}: {}",
                    entry.job.build_id(),
                    status,
                    event.error.as_deref().unwrap_or_default()
                ),
            }
        }

        // Emitted under the lock so a restart's `starting` always follows it
        let mut jobs = self.jobs();
        if let Some(event) = event {
            self.sink.emit(event);
        }
        jobs.release(entry.job.build_id(), entry.seq);
    }

    fn record_progress(&self, build_id: &str, seq: u64, classification: Classification) {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.live(build_id, seq) else {
            return;
        };

        if entry.job.advance(classification.percent, classification.message) {
            debug!("Build {} at {}% ({})", build_id, classification.percent, classification.phase);
            self.sink.emit(entry.job.snapshot());
        }
    }

    async fn run_job(
        self: Arc<Self>,
        options: BuildOptions,
        seq: u64,
        container_name: String,
        exited: watch::Sender<bool>,
    ) {
        let build_id = options.build_id.clone();

        match self.launch(options, seq, &container_name, exited).await {
            Ok(Some((options, process))) => self.supervise(options, seq, process).await,
            Ok(None) => debug!("Build {} finished before launch", build_id),
            Err(error) => match self.claim(&build_id, Some(seq)) {
                Some(entry) => self.finish(entry, JobOutcome::Failed(error)),
                None => debug!("Launch failure of build {} ignored: {}", build_id, error),
            },
        }
    }

    /// Prepare directories and image, then start the container
    ///
    /// Returns `None` if the job was finished by someone else before the
    /// container could be started.
    async fn launch(
        &self,
        mut options: BuildOptions,
        seq: u64,
        container_name: &str,
        exited: watch::Sender<bool>,
    ) -> Result<Option<(BuildOptions, BuildProcess)>> {
        tokio::fs::create_dir_all(&options.output_path).await.map_err(|e| {
            BuildError::launch(format!(
                "cannot create output directory {}: {e}",
                options.output_path.display()
            ))
        })?;
        options.output_path = canonical(&options.output_path, "output directory").await?;
        options.project_path = canonical(&options.project_path, "project path").await?;

        self.provisioner.ensure_image().await?;

        if !self.is_live(&options.build_id, seq) {
            return Ok(None);
        }

        let process = self.supervisor.launch(&options, container_name, exited).await?;

        let still_live = {
            let mut jobs = self.jobs();
            match jobs.live(&options.build_id, seq) {
                Some(entry) => {
                    if entry.job.mark_building("Build container running") {
                        self.sink.emit(entry.job.snapshot());
                    }
                    true
                }
                None => false,
            }
        };
        if !still_live {
            // Cancelled while the container was starting
            process.kill().await;
        }

        Ok(Some((options, process)))
    }

    async fn supervise(&self, options: BuildOptions, seq: u64, process: BuildProcess) {
        let build_id = options.build_id.as_str();

        let result = process
            .supervise(self.classifier.as_ref(), |classification| {
                self.record_progress(build_id, seq, classification)
            })
            .await;

        let Some(entry) = self.claim(build_id, Some(seq)) else {
            debug!("Exit of build {} ignored, already finished", build_id);
            return;
        };

        let outcome = match result {
            Ok(exit) if exit.success() => {
                match self.locator.require(&options.output_path, build_id, options.build_type) {
                    Ok(artifact) => JobOutcome::Completed(artifact),
                    Err(error) => JobOutcome::Failed(error),
                }
            }
            Ok(exit) => JobOutcome::Failed(BuildError::Execution {
                exit_code: exit.exit_code,
                stderr_tail: exit.stderr_tail,
            }),
            Err(error) => JobOutcome::Failed(error),
        };

        self.finish(entry, outcome);
    }
}

async fn canonical(path: &Path, what: &str) -> Result<PathBuf> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| BuildError::launch(format!("{what} {} is not accessible: {e}", path.display())))
}
