use crate::config::{CommitPolicy, PipelineSettings, TransformPolicy};
use crate::core::batcher::Batcher;
use crate::core::committer::{BatchCommitter, BatchOutcome};
use crate::core::progress::NoopReporter;
use crate::core::source::{spawn_chunk_feed, ChunkReader};
use crate::core::transform::RecordTransformer;
use crate::domain::model::{Batch, BatchStatus, PaymentRow, ProgressEvent, RunResult, RunState};
use crate::domain::ports::{PaymentStore, ProgressReporter, StoreConnector};
use crate::utils::error::{EtlError, Result, SourceError};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one run. Terminal phases are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Connecting,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(!self.is_terminal(), "run already ended in {:?}", self);
        tracing::debug!(from = ?*self, to = ?next, "run phase");
        *self = next;
    }
}

/// Streams a delimited input into a store: read → transform → batch → commit.
///
/// Each call to `run` is an independent run with its own store handle and
/// counters, and always yields exactly one [`RunResult`].
pub struct StreamingPipeline<C: StoreConnector> {
    connector: C,
    settings: PipelineSettings,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl<C: StoreConnector> StreamingPipeline<C> {
    pub fn new(connector: C, settings: PipelineSettings) -> Self {
        Self {
            connector,
            settings,
            reporter: Arc::new(NoopReporter),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this pipeline between batches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Loads the file at `input_path`.
    pub async fn run(&self, input_path: impl AsRef<Path>) -> RunResult {
        let path = input_path.as_ref();
        tracing::info!(input = %path.display(), "🚀 starting load");
        self.execute(|settings| ChunkReader::open_path(path, settings))
            .await
    }

    /// Loads from any byte stream with a header row.
    pub async fn run_reader<R>(&self, input: R) -> RunResult
    where
        R: Read + Send + 'static,
    {
        self.execute(move |settings| ChunkReader::from_reader(input, settings))
            .await
    }

    async fn execute<R, F>(&self, open: F) -> RunResult
    where
        R: Read + Send + 'static,
        F: FnOnce(&PipelineSettings) -> std::result::Result<ChunkReader<R>, SourceError>,
    {
        let mut phase = RunPhase::Idle;

        phase.advance(RunPhase::Connecting);
        let mut store = match self.connector.connect().await {
            Ok(store) => store,
            Err(e) => {
                phase.advance(RunPhase::Failed);
                tracing::error!(target_db = %e.target, error = %e.message, "❌ could not connect");
                return RunResult::failed(RunState::default(), e.into());
            }
        };

        phase.advance(RunPhase::Streaming);
        let mut state = RunState::default();
        let streamed = match open(&self.settings) {
            Ok(reader) => self.stream(&mut store, reader, &mut state).await,
            Err(e) => Err(e.into()),
        };

        if streamed.is_ok() {
            phase.advance(RunPhase::Finalizing);
        }
        release(&mut store).await;

        match streamed {
            Ok(()) => {
                phase.advance(RunPhase::Completed);
                tracing::info!(
                    rows_inserted = state.rows_inserted,
                    batches = state.batches_attempted,
                    batches_failed = state.batches_failed,
                    rows_skipped = state.rows_skipped,
                    "✅ load completed"
                );
                RunResult::completed(state)
            }
            Err(e) => {
                phase.advance(RunPhase::Failed);
                tracing::error!(
                    error = %e,
                    rows_inserted = state.rows_inserted,
                    batches = state.batches_attempted,
                    "❌ load failed"
                );
                RunResult::failed(state, e)
            }
        }
    }

    /// Streaming phase against an already open store. The store is not
    /// closed here; counters in `state` stay valid when this returns an error.
    pub async fn stream<S, R>(&self, store: &mut S, reader: ChunkReader<R>, state: &mut RunState) -> Result<()>
    where
        S: PaymentStore + ?Sized,
        R: Read + Send + 'static,
    {
        let transformer = RecordTransformer::from_settings(&self.settings);
        let mut load = BatchLoad {
            store,
            committer: BatchCommitter::new(self.settings.commit_timeout),
            reporter: self.reporter.as_ref(),
            cancel: &self.cancel,
            policy: self.settings.on_commit_error,
            state,
            bytes_read: 0,
            total_bytes: reader.total_bytes(),
        };
        let mut batcher = Batcher::new(self.settings.batch_size);
        let mut feed = spawn_chunk_feed(reader, self.settings.prefetch_chunks);
        // a full batch waits for the next record, so the last batch of the run
        // is committed after `total_rows` is known
        let mut held: Option<Vec<PaymentRow>> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(EtlError::Cancelled { batches: load.state.batches_attempted });
                }
                next = feed.recv() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    if let Some(rows) = held.take() {
                        load.commit(rows).await?;
                    }
                    return Err(e.into());
                }
                None => break,
            };
            tracing::debug!(chunk = chunk.index, records = chunk.len(), "chunk read");
            load.bytes_read = chunk.bytes_read;

            for record in chunk.records {
                if let Some(rows) = held.take() {
                    load.commit(rows).await?;
                }
                load.state.rows_read += 1;
                match transformer.transform(&record) {
                    Ok(row) => held = batcher.push(row),
                    Err(e) => match self.settings.on_transform_error {
                        TransformPolicy::Fail => return Err(e.into()),
                        TransformPolicy::Skip => {
                            tracing::warn!(error = %e, "skipping row");
                            load.state.rows_skipped += 1;
                        }
                    },
                }
            }
        }

        load.state.total_rows = Some(load.state.rows_read);
        if let Some(rows) = held.take().or_else(|| batcher.finish()) {
            load.commit(rows).await?;
        }
        Ok(())
    }
}

async fn release<S: PaymentStore + ?Sized>(store: &mut S) {
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "closing the store failed");
    }
}

/// Per-run commit loop state.
struct BatchLoad<'a, S: PaymentStore + ?Sized> {
    store: &'a mut S,
    committer: BatchCommitter,
    reporter: &'a dyn ProgressReporter,
    cancel: &'a CancellationToken,
    policy: CommitPolicy,
    state: &'a mut RunState,
    bytes_read: u64,
    total_bytes: Option<u64>,
}

impl<S: PaymentStore + ?Sized> BatchLoad<'_, S> {
    async fn commit(&mut self, rows: Vec<PaymentRow>) -> Result<()> {
        // cancellation takes effect before a batch starts, never inside one
        if self.cancel.is_cancelled() {
            return Err(EtlError::Cancelled {
                batches: self.state.batches_attempted,
            });
        }

        self.state.batches_attempted += 1;
        let batch = Batch::new(self.state.batches_attempted, rows);

        let (status, failure) = match self.committer.commit(&mut *self.store, &batch).await {
            BatchOutcome::Committed { rows, elapsed, .. } => {
                self.state.rows_inserted += rows as u64;
                tracing::debug!(
                    batch = batch.index,
                    rows,
                    rows_inserted = self.state.rows_inserted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "batch committed"
                );
                (BatchStatus::Committed, None)
            }
            BatchOutcome::RolledBack(err) => {
                self.state.batches_failed += 1;
                self.state.rows_failed += batch.len() as u64;
                tracing::warn!(
                    batch = batch.index,
                    rows = batch.len(),
                    kind = ?err.kind,
                    error = %err.message,
                    "batch rolled back"
                );
                (BatchStatus::RolledBack, Some(err))
            }
        };

        self.reporter.report(&ProgressEvent {
            batch_index: batch.index,
            batch_rows: batch.len(),
            status,
            rows_inserted: self.state.rows_inserted,
            total_rows: self.state.total_rows,
            bytes_read: self.bytes_read,
            total_bytes: self.total_bytes,
        });

        match (failure, self.policy) {
            (Some(err), CommitPolicy::Abort) => Err(err.into()),
            _ => Ok(()),
        }
    }
}
