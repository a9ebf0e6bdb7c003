use crate::domain::model::{BatchStatus, ProgressEvent};
use crate::domain::ports::ProgressReporter;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Logs each batch decision through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: &ProgressEvent) {
        let percent = event.fraction().map(|f| format!("{:.1}%", f * 100.0));
        match event.status {
            BatchStatus::Committed => tracing::info!(
                batch = event.batch_index,
                rows = event.batch_rows,
                rows_inserted = event.rows_inserted,
                total_rows = ?event.total_rows,
                progress = percent.as_deref().unwrap_or("?"),
                "📦 batch committed"
            ),
            BatchStatus::RolledBack => tracing::warn!(
                batch = event.batch_index,
                rows = event.batch_rows,
                rows_inserted = event.rows_inserted,
                progress = percent.as_deref().unwrap_or("?"),
                "⚠️ batch rolled back"
            ),
        }
    }
}

/// Publishes events on a tokio broadcast channel, e.g. for a progress bar.
///
/// Sending never waits: a slow subscriber lags and loses the oldest events
/// instead of stalling the run.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastReporter {
    fn report(&self, event: &ProgressEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event.clone());
    }
}

/// Forwards every event to several reporters, in order.
#[derive(Clone, Default)]
pub struct FanOutReporter {
    reporters: Vec<Arc<dyn ProgressReporter>>,
}

impl FanOutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl ProgressReporter for FanOutReporter {
    fn report(&self, event: &ProgressEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}
