//! JSONL sink - one line per committed window, appended through the backend

use super::{SinkContext, SinkError, WindowSink};
use crate::archive::Backend;
use crate::usage::{Period, UsageMap};
use serde::Serialize;
use std::io::{Seek, SeekFrom, Write};

#[derive(Debug, Serialize)]
struct WindowLine<'a> {
    period: Period,
    usage: &'a UsageMap,
    total: f64,
}

pub struct JsonlSink<S> {
    name: String,
    stream: S,
    lines_written: u64,
}

impl<S: Write + Seek> JsonlSink<S> {
    /// Stream name used for `identity`'s window log
    pub fn stream_name(identity: &str) -> String {
        format!("{}-windows.jsonl", identity)
    }

    pub fn new<B>(ctx: &SinkContext<'_, B>) -> Result<Self, SinkError>
    where
        B: Backend<Stream = S>,
    {
        let name = Self::stream_name(ctx.identity);
        let stream = ctx.backend.open(&name)?;

        log::info!("📝 Writing committed windows to: {}", name);
        if let Some(end) = ctx.checkpoints.get_state().ok().flatten() {
            log::info!("   Resuming after window ending at {}", end);
        }

        Ok(Self {
            name,
            stream,
            lines_written: 0,
        })
    }
}

impl<S: Write + Seek> WindowSink for JsonlSink<S> {
    fn append(&mut self, usage: &UsageMap, start: i64, end: i64) -> Result<(), SinkError> {
        let total = usage
            .values()
            .flatten()
            .filter_map(|entry| entry.price())
            .sum();
        let line = WindowLine {
            period: Period { begin: start, end },
            usage,
            total,
        };

        let json = serde_json::to_string(&line)?;
        self.stream.seek(SeekFrom::End(0))?;
        writeln!(self.stream, "{}", json)?;
        self.stream.flush()?;
        self.lines_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.stream.flush()?;
        log::info!("Closed {} after {} windows", self.name, self.lines_written);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}
