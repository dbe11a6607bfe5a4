//! Progress notification for download jobs.
//!
//! Observers are invoked from worker tasks while the job's shared counter
//! lock is held, so implementations must return quickly and never block.
//! Delivery order across workers is not guaranteed.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Smoothed throughput in bytes per second
    pub speed_bps: f64,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0) as f32
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Forwards updates into a channel; drops them when the consumer lags
impl ProgressObserver for mpsc::Sender<ProgressUpdate> {
    fn on_progress(&self, update: ProgressUpdate) {
        let _ = self.try_send(update);
    }
}

impl ProgressObserver for mpsc::UnboundedSender<ProgressUpdate> {
    fn on_progress(&self, update: ProgressUpdate) {
        let _ = self.send(update);
    }
}

/// Observer that ignores every update
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}
