//! Per-job deadline timer

use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-shot deadline that runs a callback unless disarmed first
///
/// Dropping the controller disarms it.
#[derive(Debug)]
pub struct TimeoutController {
    deadline: Duration,
    handle: JoinHandle<()>,
}

impl TimeoutController {
    /// Arm a timer calling `on_expire` after `deadline`
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(deadline: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            on_expire();
        });

        Self { deadline, handle }
    }

    /// Configured deadline
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Check if the timer is still pending
    pub fn is_armed(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the timer; a no-op if it already fired
    pub fn disarm(self) {
        // Drop does the work
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
