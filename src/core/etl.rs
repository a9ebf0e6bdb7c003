use crate::core::pipeline::StreamingPipeline;
use crate::domain::model::RunResult;
use crate::domain::ports::StoreConnector;
use crate::utils::monitor::ResourceMonitor;
use std::path::Path;
use std::time::Instant;

/// Runs a pipeline and logs a summary, optionally with resource sampling.
pub struct EtlEngine<C: StoreConnector> {
    pipeline: StreamingPipeline<C>,
    monitor: ResourceMonitor,
}

impl<C: StoreConnector> EtlEngine<C> {
    pub fn new(pipeline: StreamingPipeline<C>) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: StreamingPipeline<C>, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: ResourceMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &StreamingPipeline<C> {
        &self.pipeline
    }

    pub async fn run(&self, input_path: impl AsRef<Path>) -> RunResult {
        let started = Instant::now();
        self.monitor.log_phase("start");

        let result = self.pipeline.run(input_path).await;

        self.monitor.log_phase("load");
        tracing::info!(
            status = ?result.status,
            rows_read = result.state.rows_read,
            rows_inserted = result.state.rows_inserted,
            rows_skipped = result.state.rows_skipped,
            batches = result.state.batches_attempted,
            batches_failed = result.state.batches_failed,
            "📋 run summary ({:.2?})",
            started.elapsed()
        );
        if result.is_partial() {
            tracing::warn!(
                batches_failed = result.state.batches_failed,
                rows_failed = result.state.rows_failed,
                "⚠️ some batches were rolled back; their rows were not loaded"
            );
        }
        self.monitor.log_final();

        result
    }
}
