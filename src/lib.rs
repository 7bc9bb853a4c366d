//! Usage Flow - hourly usage windows with an append-only archive and resumable checkpoints
//!
//! # Architecture
//!
//! ```text
//! PeriodRecord batches (any order)
//!     ↓
//! WindowAggregator (earliest record first, one open window)
//!     ↓  on boundary crossing or explicit commit
//! TransientArchive (write-once zip entry per window)
//!     ↓
//! WriterPipeline (every sink, registration order)
//!     ↓
//! CheckpointStore (last committed end + cumulative total)
//! ```

pub mod aggregator;
pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod reader;
pub mod sink;
pub mod sqlite_pragma;
pub mod usage;
pub mod window;

pub use aggregator::{AggregatorError, AggregatorState, WindowAggregator};
pub use archive::{ArchiveError, ArchiveLookup, Backend, FsBackend, TransientArchive};
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointMetadata, CheckpointStore, MemoryCheckpointStore,
    SqliteCheckpointStore,
};
pub use config::{ConfigError, RunnerConfig, SinkType};
pub use reader::TailReader;
pub use sink::{
    JsonlSink, PipelineError, SinkContext, SinkError, SqliteSink, WindowSink, WriterPipeline,
};
pub use usage::{Period, PeriodRecord, UsageEntry, UsageMap};
pub use window::{take_earliest, Window, DEFAULT_PERIOD_SECS};
