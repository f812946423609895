//! The run orchestrator: one bounded, resumable ingestion pass.
//!
//! # Run
//! 1. Resolve the range: explicit bounds, or `checkpoint + 1 ..= head - lag`.
//! 2. Empty range → empty summary, nothing touched.
//! 3. Plan provider-capped chunks.
//! 4. Run chunks on `concurrency` spawned workers: fetch → decode → write.
//!    Failures stay with their chunk; siblings keep going.
//! 5. After every worker settles, advance the checkpoint to the end of the
//!    contiguous run of succeeded chunks from the start of the plan.
//!
//! Cancellation stops dispatching: chunks already running finish, the rest
//! are reported as skipped. A chunk error that is not chunk-recoverable
//! (see [`IngestError::is_chunk_recoverable`]) aborts the run before the
//! checkpoint moves.

use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use chainingest_core::checkpoint::{CheckpointStore, CheckpointUpdate};
use chainingest_core::config::IngestConfig;
use chainingest_core::error::IngestError;
use chainingest_core::planner::ChunkPlanner;
use chainingest_core::types::{BlockRange, RunState, RunSummary, WriteStats};
use chainingest_core::writer::IngestionWriter;

use crate::decoder::EventDecoder;
use crate::fetcher::BlockRangeFetcher;

/// Optional explicit bounds for a run (backfill / override mode).
///
/// A missing `from` resumes from the checkpoint; a missing `to` follows the
/// confirmed chain head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

impl RunRequest {
    pub fn follow() -> Self {
        Self::default()
    }

    pub fn range(from: u64, to: u64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }
}

/// What one chunk worker produced.
#[derive(Debug, Clone, Default)]
struct ChunkReport {
    decoded: u64,
    unknown: u64,
    malformed: u64,
    unresolved: u64,
    write: WriteStats,
    last_timestamp: Option<i64>,
}

enum ChunkOutcome {
    Succeeded(ChunkReport),
    Failed(IngestError),
    Skipped,
}

/// Everything a chunk worker needs, cheap to clone into a task.
#[derive(Clone)]
struct Worker {
    fetcher: Arc<BlockRangeFetcher>,
    decoder: Arc<EventDecoder>,
    writer: IngestionWriter,
    state: Arc<Mutex<RunState>>,
}

impl Worker {
    fn enter(&self, state: RunState) {
        *self.state.lock().unwrap() = state;
    }

    async fn process(self, chunk: BlockRange) -> Result<ChunkReport, IngestError> {
        self.enter(RunState::Fetching);
        let logs = self.fetcher.fetch(chunk).await?;
        self.enter(RunState::Decoding);
        let decoded = self.decoder.decode(&logs);
        self.enter(RunState::Writing);
        let write = self.writer.write(&decoded.events).await?;
        Ok(ChunkReport {
            decoded: decoded.events.len() as u64,
            unknown: decoded.unknown,
            malformed: decoded.malformed,
            unresolved: decoded.unresolved,
            write,
            last_timestamp: decoded.events.iter().filter_map(|e| e.timestamp).max(),
        })
    }
}

pub struct Orchestrator {
    config: IngestConfig,
    planner: ChunkPlanner,
    worker: Worker,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
}

impl Orchestrator {
    pub fn new(
        config: IngestConfig,
        fetcher: Arc<BlockRangeFetcher>,
        decoder: Arc<EventDecoder>,
        writer: IngestionWriter,
        checkpoints: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let planner = ChunkPlanner::new(fetcher.provider().max_block_range())?;
        let state = Arc::new(Mutex::new(RunState::Idle));
        Ok(Self {
            config,
            planner,
            worker: Worker {
                fetcher,
                decoder,
                writer,
                state: state.clone(),
            },
            checkpoints,
            cancel,
            state,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest block reported by the provider.
    pub async fn chain_head(&self) -> Result<u64, IngestError> {
        self.worker.fetcher.chain_head().await
    }

    fn set_state(&self, state: RunState) {
        tracing::debug!(stream = %self.config.stream, %state, "run state");
        *self.state.lock().unwrap() = state;
    }

    /// Execute one run.
    ///
    /// Chunk-level failures are reported in the summary, not as `Err`.
    /// `Err` is reserved for failures that leave nothing to report: the
    /// chain head or checkpoint cannot be read, the plan is invalid, or a
    /// checkpoint regression was attempted.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, IngestError> {
        let result = self.run_inner(request).await;
        match &result {
            Ok(summary) => self.set_state(summary.state),
            Err(_) => self.set_state(RunState::Failed),
        }
        result
    }

    async fn run_inner(&self, request: RunRequest) -> Result<RunSummary, IngestError> {
        let stream = self.config.stream.clone();
        self.set_state(RunState::Planning);

        let checkpoint = self.checkpoints.read(&stream).await?;
        let resume_from = checkpoint
            .as_ref()
            .map(|cp| cp.last_block.saturating_add(1))
            .unwrap_or(self.config.start_block);

        let from = request.from.unwrap_or(resume_from);
        let to = match request.to {
            Some(to) => Some(to),
            None => {
                let head = self.chain_head().await?;
                head.checked_sub(self.config.confirmation_lag)
            }
        };

        let range = match to.and_then(|to| BlockRange::new(from, to)) {
            Some(range) => range,
            None => {
                tracing::info!(stream = %stream, from, ?to, "already up to date");
                return Ok(RunSummary::empty(
                    stream,
                    checkpoint.map(|cp| cp.last_block),
                ));
            }
        };

        let window = self.planner.effective_window(self.config.block_window)?;
        let chunks = self.planner.plan(range.from, range.to, window)?;
        tracing::info!(
            stream = %stream,
            from = range.from,
            to = range.to,
            window,
            chunks = chunks.len(),
            concurrency = self.config.concurrency,
            "run planned"
        );

        self.set_state(RunState::Fetching);
        let mut outcomes = self.dispatch(&chunks).await;
        outcomes.sort_by_key(|(idx, _, _)| *idx);

        let mut summary = RunSummary::empty(stream.clone(), checkpoint.as_ref().map(|cp| cp.last_block));
        summary.range = Some(range);
        summary.chunks_planned = chunks.len() as u64;

        // Contiguous succeeded prefix from the start of the plan.
        let mut prefix_end: Option<u64> = None;
        let mut prefix_events = 0u64;
        let mut prefix_timestamp: Option<i64> = None;
        let mut prefix_open = true;

        for (_, chunk, outcome) in outcomes {
            match outcome {
                ChunkOutcome::Succeeded(r) => {
                    summary.chunks_succeeded += 1;
                    summary.events_decoded += r.decoded;
                    summary.events_written += r.write.written;
                    summary.duplicates_skipped += r.write.duplicates_skipped;
                    summary.events_unknown += r.unknown;
                    summary.events_malformed += r.malformed;
                    summary.events_unresolved += r.unresolved;
                    if prefix_open {
                        prefix_end = Some(chunk.to);
                        prefix_events += r.write.written;
                        prefix_timestamp = prefix_timestamp.max(r.last_timestamp);
                    }
                }
                ChunkOutcome::Failed(e) if !e.is_chunk_recoverable() => {
                    tracing::error!(stream = %stream, chunk = %chunk, error = %e, "unrecoverable chunk failure, aborting run");
                    return Err(e);
                }
                ChunkOutcome::Failed(e) => {
                    prefix_open = false;
                    summary.chunks_failed += 1;
                    summary.failed_ranges.push(chunk);
                    if let IngestError::Write { stats, .. } = &e {
                        summary.events_written += stats.written;
                        summary.duplicates_skipped += stats.duplicates_skipped;
                        summary.write_errors += stats.errors;
                    }
                    tracing::warn!(stream = %stream, chunk = %chunk, error = %e, "chunk failed");
                }
                ChunkOutcome::Skipped => {
                    prefix_open = false;
                    summary.chunks_skipped += 1;
                }
            }
        }

        if let Some(last_block) = prefix_end {
            self.set_state(RunState::Checkpointing);
            summary.checkpoint_block = self
                .advance_checkpoint(range.from, last_block, prefix_events, prefix_timestamp)
                .await?
                .or(summary.checkpoint_block);
        }

        summary.state = if summary.is_complete() {
            RunState::Idle
        } else {
            RunState::Failed
        };

        tracing::info!(
            stream = %stream,
            planned = summary.chunks_planned,
            succeeded = summary.chunks_succeeded,
            failed = summary.chunks_failed,
            skipped = summary.chunks_skipped,
            written = summary.events_written,
            duplicates = summary.duplicates_skipped,
            checkpoint = ?summary.checkpoint_block,
            "run finished"
        );
        Ok(summary)
    }

    /// Run every chunk on its own task, at most `concurrency` at a time, and
    /// wait for all of them.
    async fn dispatch(&self, chunks: &[BlockRange]) -> Vec<(usize, BlockRange, ChunkOutcome)> {
        stream::iter(chunks.iter().copied().enumerate())
            .map(|(idx, chunk)| {
                let worker = self.worker.clone();
                let cancel = self.cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        tracing::debug!(chunk = %chunk, "cancelled before start");
                        return (idx, chunk, ChunkOutcome::Skipped);
                    }
                    let outcome = match tokio::spawn(worker.process(chunk)).await {
                        Ok(Ok(report)) => {
                            tracing::info!(
                                chunk = %chunk,
                                decoded = report.decoded,
                                written = report.write.written,
                                duplicates = report.write.duplicates_skipped,
                                "chunk done"
                            );
                            ChunkOutcome::Succeeded(report)
                        }
                        Ok(Err(e)) => ChunkOutcome::Failed(e),
                        Err(join) => {
                            tracing::error!(chunk = %chunk, error = %join, "chunk worker panicked");
                            ChunkOutcome::Failed(IngestError::WorkerPanicked { range: chunk })
                        }
                    };
                    (idx, chunk, outcome)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    /// Move the checkpoint to `last_block` if the written prefix starting at
    /// `from` continues the stream's progress without a gap and moves it
    /// forward. Returns the new checkpoint block when one was written.
    async fn advance_checkpoint(
        &self,
        from: u64,
        last_block: u64,
        delta_events: u64,
        last_timestamp: Option<i64>,
    ) -> Result<Option<u64>, IngestError> {
        let stream = &self.config.stream;
        // Re-read: a concurrent run may have moved it since planning.
        let current = self.checkpoints.read(stream).await?;
        let expected_next = current
            .as_ref()
            .map(|cp| cp.last_block.saturating_add(1))
            .unwrap_or(self.config.start_block);

        if from > expected_next {
            tracing::info!(
                stream = %stream,
                from,
                expected_next,
                "range does not continue checkpointed progress, checkpoint left unchanged"
            );
            return Ok(None);
        }
        if current.as_ref().is_some_and(|cp| last_block <= cp.last_block) {
            return Ok(None);
        }

        let cp = self
            .checkpoints
            .advance(
                stream,
                CheckpointUpdate {
                    last_block,
                    delta_events,
                    last_timestamp,
                },
            )
            .await
            .map_err(|e| {
                if e.is_regression() {
                    tracing::error!(stream = %stream, error = %e, "checkpoint regression rejected");
                }
                e
            })?;
        tracing::info!(stream = %stream, last_block = cp.last_block, events = cp.events_count, "checkpoint advanced");
        Ok(Some(cp.last_block))
    }
}
