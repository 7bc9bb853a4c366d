//! Usage Flow Runner - tails usage batches and commits fixed windows
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin usageflow -- --sink sqlite
//! ```
//!
//! ## Environment Variables
//!
//! - USAGEFLOW_IDENTITY - Tenant whose usage is aggregated (required)
//! - USAGEFLOW_PERIOD_SECS - Window length in seconds (default: 3600)
//! - USAGEFLOW_DATA_DIR - Archive containers and JSONL window log (default: data/usageflow)
//! - USAGEFLOW_INPUT_PATH - Batch JSONL stream (default: streams/usage/batches.jsonl)
//! - USAGEFLOW_DB_PATH - Checkpoint / SQLite sink database (default: data/usageflow/usageflow.db)
//! - RUST_LOG - Logging level (optional, default: info)

use std::time::Duration;
use usageflow::{
    FsBackend, JsonlSink, PeriodRecord, RunnerConfig, SinkType, SqliteCheckpointStore, SqliteSink,
    TailReader, WindowAggregator, WindowSink,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let config = RunnerConfig::from_env(SinkType::from_args(&args))?;

    log::info!("🚀 Starting Usage Flow");
    log::info!("   Identity: {}", config.identity);
    log::info!("   Period: {}s", config.period_secs);
    log::info!("   Input: {}", config.input_path.display());
    log::info!("   Data dir: {}", config.data_dir.display());
    log::info!("   Checkpoints: {}", config.db_path.display());

    let backend = FsBackend::new(&config.data_dir)?;
    let checkpoints = SqliteCheckpointStore::new(&config.db_path, &config.identity)?;
    let mut aggregator =
        WindowAggregator::resume(config.identity.clone(), config.period_secs, backend, checkpoints)?;

    match config.sink {
        SinkType::Jsonl => aggregator.add_writer(|ctx| {
            let sink: Box<dyn WindowSink> = Box::new(JsonlSink::new(ctx)?);
            Ok(sink)
        })?,
        SinkType::Sqlite => {
            let db_path = config.db_path.clone();
            aggregator.add_writer(move |ctx| {
                let sink: Box<dyn WindowSink> = Box::new(SqliteSink::new(&db_path, ctx.identity)?);
                Ok(sink)
            })?
        }
    }
    log::info!("📊 Sink: {}", config.sink.as_str());

    // The input is read from the top on every start; records before the
    // checkpointed end are skipped by the aggregator
    let mut reader = TailReader::new(config.input_path.clone());
    reader.start(false).await?;

    log::info!("✅ Usage Flow running - processing batches...");

    loop {
        tokio::select! {
            line_result = reader.read_line() => {
                match line_result {
                    Ok(line) => match PeriodRecord::batch_from_jsonl(&line) {
                        Ok(mut batch) => {
                            if let Err(e) = aggregator.append(&mut batch) {
                                log::error!(
                                    "Failed to process batch ({} records left unprocessed): {}",
                                    batch.len(),
                                    e
                                );
                            }
                        }
                        Err(e) => log::warn!("Failed to parse batch: {}", e),
                    },
                    Err(e) => {
                        log::error!("Input stream error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("🛑 Shutdown requested, flushing open window...");
                break;
            }
        }
    }

    aggregator.commit()?;
    aggregator.close()?;

    log::info!(
        "👋 Usage Flow stopped after {} commits (total {:.4})",
        aggregator.commits(),
        aggregator.total()
    );
    Ok(())
}
