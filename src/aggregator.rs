//! Window Aggregator - buffers period records into fixed windows and commits each once
//!
//! A commit runs three steps in a fixed order:
//!
//! 1. archive write (idempotent, keyed by window start)
//! 2. fan-out to every registered sink, in registration order
//! 3. checkpoint update (last committed end + cumulative total)
//!
//! Any failure stops the sequence before the checkpoint moves, and the
//! window stays open so `commit()` can be retried.

use crate::archive::{ArchiveError, Backend, TransientArchive};
use crate::checkpoint::{CheckpointError, CheckpointMetadata, CheckpointStore};
use crate::sink::{PipelineError, SinkContext, SinkError, WindowSink, WriterPipeline};
use crate::usage::PeriodRecord;
use crate::window::{take_earliest, Window};

#[derive(Debug)]
pub enum AggregatorError {
    Archive(ArchiveError),
    Pipeline(PipelineError),
    Checkpoint(CheckpointError),
    /// A sink factory refused to build its sink
    SinkSetup(SinkError),
    /// An entry without a numeric price
    InvalidEntry { begin: i64, service: String },
    InvalidPeriod(i64),
    /// A window start whose end or calendar key cannot be represented
    InvalidTimestamp(i64),
}

impl From<ArchiveError> for AggregatorError {
    fn from(err: ArchiveError) -> Self {
        AggregatorError::Archive(err)
    }
}

impl From<PipelineError> for AggregatorError {
    fn from(err: PipelineError) -> Self {
        AggregatorError::Pipeline(err)
    }
}

impl From<CheckpointError> for AggregatorError {
    fn from(err: CheckpointError) -> Self {
        AggregatorError::Checkpoint(err)
    }
}

impl From<SinkError> for AggregatorError {
    fn from(err: SinkError) -> Self {
        AggregatorError::SinkSetup(err)
    }
}

impl std::fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregatorError::Archive(e) => write!(f, "Archive error: {}", e),
            AggregatorError::Pipeline(e) => write!(f, "Pipeline error: {}", e),
            AggregatorError::Checkpoint(e) => write!(f, "Checkpoint error: {}", e),
            AggregatorError::SinkSetup(e) => write!(f, "Sink setup error: {}", e),
            AggregatorError::InvalidEntry { begin, service } => write!(
                f,
                "Record starting at {} has an unpriced entry for service '{}'",
                begin, service
            ),
            AggregatorError::InvalidPeriod(p) => write!(f, "Period must be positive, got {}", p),
            AggregatorError::InvalidTimestamp(ts) => {
                write!(f, "Timestamp {} is outside the representable window range", ts)
            }
        }
    }
}

impl std::error::Error for AggregatorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Empty,
    Accumulating,
}

/// One identity's aggregation engine.
///
/// Owns its archive handle, sinks and checkpoint store; never share an
/// instance between callers.
pub struct WindowAggregator<B: Backend, C: CheckpointStore> {
    identity: String,
    period: i64,
    backend: B,
    checkpoints: C,
    archive: Option<TransientArchive<B::Stream>>,
    pipeline: WriterPipeline,
    window: Option<Window>,
    /// End of the last committed window; records starting before it are dropped
    committed_end: Option<i64>,
    total: f64,
    commits: u64,
    skipped: u64,
}

impl<B: Backend, C: CheckpointStore> WindowAggregator<B, C> {
    /// Start with no open window, carrying the cumulative total from the checkpoint store
    pub fn new(
        identity: impl Into<String>,
        period: i64,
        backend: B,
        checkpoints: C,
    ) -> Result<Self, AggregatorError> {
        if period <= 0 {
            return Err(AggregatorError::InvalidPeriod(period));
        }
        let committed_end = checkpoints.get_state()?;
        let total = checkpoints.get_metadata()?.total;

        Ok(Self {
            identity: identity.into(),
            period,
            backend,
            checkpoints,
            archive: None,
            pipeline: WriterPipeline::new(),
            window: None,
            committed_end,
            total,
            commits: 0,
            skipped: 0,
        })
    }

    /// Like `new`, but opens the window that follows the last committed one
    pub fn resume(
        identity: impl Into<String>,
        period: i64,
        backend: B,
        checkpoints: C,
    ) -> Result<Self, AggregatorError> {
        let mut aggregator = Self::new(identity, period, backend, checkpoints)?;
        if let Some(last_end) = aggregator.committed_end {
            let window = Window::new(last_end, period)
                .ok_or(AggregatorError::InvalidTimestamp(last_end))?;
            log::info!(
                "🔄 Resuming {} at window {}..{} (total {:.4})",
                aggregator.identity,
                window.start,
                window.end,
                aggregator.total
            );
            aggregator.window = Some(window);
        }
        Ok(aggregator)
    }

    /// Build a sink from this aggregator's references and append it to the pipeline
    pub fn add_writer<F>(&mut self, factory: F) -> Result<(), AggregatorError>
    where
        F: FnOnce(&SinkContext<'_, B>) -> Result<Box<dyn WindowSink>, SinkError>,
    {
        let ctx = SinkContext {
            identity: &self.identity,
            period: self.period,
            backend: &self.backend,
            checkpoints: &self.checkpoints,
        };
        let sink = factory(&ctx)?;
        self.pipeline.register(sink);
        Ok(())
    }

    /// Merge an unordered batch, committing each window as a later one begins.
    ///
    /// Records are taken earliest `period.begin` first. Records starting
    /// before the last committed end were already archived and are dropped
    /// without touching the total. On error the record being processed and
    /// everything after it stay in `batch`.
    pub fn append(&mut self, batch: &mut Vec<PeriodRecord>) -> Result<(), AggregatorError> {
        while let Some(record) = take_earliest(batch) {
            let begin = record.begin();

            if !self.is_representable(begin) {
                batch.insert(0, record);
                return Err(AggregatorError::InvalidTimestamp(begin));
            }

            if let Some(end) = self.committed_end.filter(|end| begin < *end) {
                log::warn!(
                    "Skipping record at {} for {}: already committed through {}",
                    begin,
                    self.identity,
                    end
                );
                self.skipped += 1;
                continue;
            }

            if let Err(service) = record.price_total() {
                batch.insert(0, record);
                return Err(AggregatorError::InvalidEntry { begin, service });
            }

            if self.window.as_ref().is_some_and(|w| w.is_crossed_by(begin)) {
                if let Err(e) = self.commit() {
                    batch.insert(0, record);
                    return Err(e);
                }
            }

            let window = match self.window.take() {
                Some(window) => window,
                None => match Window::new(begin, self.period) {
                    Some(window) => {
                        log::debug!("Opening window {}..{}", window.start, window.end);
                        window
                    }
                    None => {
                        batch.insert(0, record);
                        return Err(AggregatorError::InvalidTimestamp(begin));
                    }
                },
            };
            let window = self.window.insert(window);

            if begin < window.start {
                log::warn!(
                    "Late record at {} merged into window {}..{}",
                    begin,
                    window.start,
                    window.end
                );
            }

            self.total += window.merge(record.usage);
        }
        Ok(())
    }

    /// Commit the open window now. Returns `false` when no window is open.
    pub fn commit(&mut self) -> Result<bool, AggregatorError> {
        let Some(window) = self.window.as_ref() else {
            log::debug!("No open window to commit for {}", self.identity);
            return Ok(false);
        };

        let archive = Self::archive_for(&mut self.archive, &self.backend, &self.identity, window.start)?;
        if !archive.add(window.start, &window.usage)? {
            log::warn!(
                "Window {}..{} already archived for {}, replaying to sinks",
                window.start,
                window.end,
                self.identity
            );
        }

        if let Err(e) = self.pipeline.fan_out(&window.usage, window.start, window.end) {
            log::error!(
                "❌ Commit of window {}..{} aborted before checkpoint: {}",
                window.start,
                window.end,
                e
            );
            return Err(e.into());
        }

        self.checkpoints
            .record_commit(window.end, &CheckpointMetadata { total: self.total })?;

        log::info!(
            "✅ Committed window {}..{} for {} ({} entries, {:.4} in window, {:.4} total)",
            window.start,
            window.end,
            self.identity,
            window.entry_count(),
            window.subtotal,
            self.total
        );

        self.committed_end = Some(window.end);
        self.window = None;
        self.commits += 1;
        Ok(true)
    }

    /// Read back an archived window as a single formatted period record.
    ///
    /// A window that was never written comes back with empty usage. Reads
    /// never create containers and leave the commit container in place.
    pub fn get_timeframe(&mut self, timeframe: i64) -> Result<Vec<PeriodRecord>, AggregatorError> {
        let end = timeframe
            .checked_add(self.period)
            .ok_or(AggregatorError::InvalidTimestamp(timeframe))?;
        let name = TransientArchive::<B::Stream>::container_name(&self.identity, timeframe)?;

        let usage = match self.archive.as_mut() {
            Some(archive) if archive.name() == name => archive.get(timeframe)?,
            _ => {
                if self.backend.exists(&name).map_err(ArchiveError::from)? {
                    TransientArchive::open(&self.backend, &name)?.get(timeframe)?
                } else {
                    log::debug!("No archive container {} for window {}", name, timeframe);
                    None
                }
            }
        };

        Ok(vec![PeriodRecord::new(timeframe, end, usage.unwrap_or_default())])
    }

    /// Shut down every sink in registration order
    pub fn close(&mut self) -> Result<(), AggregatorError> {
        if self.window.is_some() {
            log::warn!("Closing {} with an uncommitted window", self.identity);
        }
        self.pipeline.close()?;
        Ok(())
    }

    fn is_representable(&self, begin: i64) -> bool {
        begin.checked_add(self.period).is_some()
            && TransientArchive::<B::Stream>::entry_name(begin).is_ok()
    }

    // Keeps the current container while the month matches, otherwise switches
    fn archive_for<'a>(
        slot: &'a mut Option<TransientArchive<B::Stream>>,
        backend: &B,
        identity: &str,
        timestamp: i64,
    ) -> Result<&'a mut TransientArchive<B::Stream>, ArchiveError> {
        let name = TransientArchive::<B::Stream>::container_name(identity, timestamp)?;
        let archive = match slot.take() {
            Some(archive) if archive.name() == name => archive,
            _ => TransientArchive::open(backend, &name)?,
        };
        Ok(slot.insert(archive))
    }

    pub fn state(&self) -> AggregatorState {
        match self.window {
            Some(_) => AggregatorState::Accumulating,
            None => AggregatorState::Empty,
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_ref()
    }

    /// Cumulative price of everything merged, committed or not
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    /// Successful commits since construction
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Records dropped because they start before the last committed end
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn committed_end(&self) -> Option<i64> {
        self.committed_end
    }

    pub fn sink_count(&self) -> usize {
        self.pipeline.len()
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }
}
