//! Build supervision for the appbuild containerized build service
//!
//! This crate runs application builds inside isolated containers, turns their
//! output into progress events and guarantees every job ends with exactly one
//! terminal event, whether it completes, fails, times out or is cancelled.

pub mod artifact;
pub mod cancellation;
pub mod error;
pub mod job;
pub mod progress;
pub mod provisioner;
pub mod registry;
pub mod sink;
pub mod supervisor;
pub mod timeout;

pub use artifact::ArtifactLocator;
pub use cancellation::{CancelReason, CancellationController, TerminationOutcome};
pub use error::{BuildError, Result};
pub use job::{BuildJob, JobOutcome};
pub use progress::{BuildPhase, Classification, MarkerClassifier, MarkerRule, ProgressClassifier};
pub use provisioner::ImageProvisioner;
pub use registry::{BuildRegistry, RegistryBuilder, RegistrySettings};
pub use sink::{ChannelSink, FanoutSink, LogSink, NoOpSink, ProgressSink};
pub use supervisor::{BuildProcess, ProcessExit, ProcessSupervisor};
