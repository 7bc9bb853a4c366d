//! Writer Pipeline - ordered downstream sinks fed with every committed window
//!
//! ```text
//! WindowAggregator::commit
//!     ↓
//! WriterPipeline (registration order, synchronous)
//!     ↓
//! JsonlSink / SqliteSink / caller-provided WindowSink
//! ```

pub mod jsonl;
pub mod sqlite;

pub use jsonl::JsonlSink;
pub use sqlite::SqliteSink;

use crate::checkpoint::CheckpointStore;
use crate::usage::UsageMap;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Rejected(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Rejected(e) => write!(f, "Window rejected: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Downstream consumer of committed windows
pub trait WindowSink {
    /// Receive one committed window covering `[start, end)`
    fn append(&mut self, usage: &UsageMap, start: i64, end: i64) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError>;

    /// Get sink type for logging
    fn sink_type(&self) -> &'static str;
}

/// References handed to a sink factory when it is registered
pub struct SinkContext<'a, B> {
    pub identity: &'a str,
    pub period: i64,
    pub backend: &'a B,
    /// Read-only view of the prior committed state
    pub checkpoints: &'a dyn CheckpointStore,
}

/// Failure of one sink, by registration position
#[derive(Debug)]
pub struct PipelineError {
    pub index: usize,
    pub sink_type: &'static str,
    pub source: SinkError,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink #{} ({}) failed: {}", self.index, self.sink_type, self.source)
    }
}

impl std::error::Error for PipelineError {}

#[derive(Default)]
pub struct WriterPipeline {
    sinks: Vec<Box<dyn WindowSink>>,
}

impl WriterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn WindowSink>) {
        log::info!("📊 Registered sink #{}: {}", self.sinks.len(), sink.sink_type());
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_types(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.sink_type()).collect()
    }

    /// Hand the window to every sink in order, stopping at the first failure
    pub fn fan_out(&mut self, usage: &UsageMap, start: i64, end: i64) -> Result<(), PipelineError> {
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            sink.append(usage, start, end).map_err(|source| PipelineError {
                index,
                sink_type: sink.sink_type(),
                source,
            })?;
        }
        Ok(())
    }

    /// Close every sink in order; all sinks are closed even if one fails
    pub fn close(&mut self) -> Result<(), PipelineError> {
        let mut first_error = None;
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(source) = sink.close() {
                log::error!("Failed to close sink #{} ({}): {}", index, sink.sink_type(), source);
                if first_error.is_none() {
                    first_error = Some(PipelineError {
                        index,
                        sink_type: sink.sink_type(),
                        source,
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
