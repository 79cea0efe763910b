//! Progress event sinks

use std::sync::Arc;

use appbuild_core::BuildProgress;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receiver of progress events
///
/// `emit` may be called from any task and must not block. It is called with
/// the registry's job table locked, so it must not call back into the
/// registry.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: BuildProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(BuildProgress) + Send + Sync,
{
    fn emit(&self, event: BuildProgress) {
        self(event)
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<BuildProgress>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BuildProgress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: BuildProgress) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(event);
    }
}

/// Writes events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: BuildProgress) {
        match &event.error {
            Some(error) => warn!(
                "[{}] {} ({}%): {}",
                event.build_id, event.status, event.progress_percent, error
            ),
            None => info!(
                "[{}] {} ({}%): {}",
                event.build_id, event.status, event.progress_percent, event.message
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl ProgressSink for NoOpSink {
    fn emit(&self, _event: BuildProgress) {}
}

/// Delivers each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: BuildProgress) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use appbuild_core::BuildStatus;

    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(BuildProgress::new("b1", BuildStatus::Starting, 5, "start"));
        sink.emit(BuildProgress::new("b1", BuildStatus::Building, 20, "deps"));

        assert_eq!(rx.recv().await.unwrap().progress_percent, 5);
        assert_eq!(rx.recv().await.unwrap().progress_percent, 20);
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(BuildProgress::new("b1", BuildStatus::Starting, 5, "start"));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = Arc::clone(&seen);
            move |event: BuildProgress| seen.lock().unwrap().push(event.build_id)
        };

        let fanout = FanoutSink::new()
            .with(Arc::new(recorder.clone()))
            .with(Arc::new(NoOpSink))
            .with(Arc::new(recorder));
        assert_eq!(fanout.len(), 3);

        fanout.emit(BuildProgress::new("b7", BuildStatus::Starting, 5, "start"));
        assert_eq!(*seen.lock().unwrap(), vec!["b7".to_string(), "b7".to_string()]);
    }
}
