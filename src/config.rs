//! Runner configuration from environment variables

use crate::window::DEFAULT_PERIOD_SECS;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkType {
    Jsonl,
    Sqlite,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkType::Jsonl => "jsonl",
            SinkType::Sqlite => "sqlite",
        }
    }

    /// Pick the sink from a `--sink <jsonl|sqlite>` argument, defaulting to JSONL
    pub fn from_args(args: &[String]) -> SinkType {
        if let Some(idx) = args.iter().position(|x| x == "--sink") {
            match args.get(idx + 1).map(|s| s.as_str()) {
                Some("sqlite") => return SinkType::Sqlite,
                Some("jsonl") => return SinkType::Jsonl,
                other => log::warn!("Unknown --sink value {:?}, using jsonl", other),
            }
        }
        SinkType::Jsonl
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Tenant whose usage is aggregated
    pub identity: String,

    /// Window length in seconds
    pub period_secs: i64,

    /// Directory holding archive containers and the JSONL window log
    pub data_dir: PathBuf,

    /// JSONL file of incoming batches, one JSON array per line
    pub input_path: PathBuf,

    /// SQLite database for checkpoints (and the SQLite sink)
    pub db_path: PathBuf,

    pub sink: SinkType,
}

impl RunnerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `USAGEFLOW_IDENTITY` (required)
    /// - `USAGEFLOW_PERIOD_SECS` (default: 3600)
    /// - `USAGEFLOW_DATA_DIR` (default: data/usageflow)
    /// - `USAGEFLOW_INPUT_PATH` (default: streams/usage/batches.jsonl)
    /// - `USAGEFLOW_DB_PATH` (default: data/usageflow/usageflow.db)
    pub fn from_env(sink: SinkType) -> Result<Self, ConfigError> {
        let identity = env::var("USAGEFLOW_IDENTITY")
            .map_err(|_| ConfigError::MissingVariable("USAGEFLOW_IDENTITY".to_string()))?;

        let period_secs = match env::var("USAGEFLOW_PERIOD_SECS") {
            Ok(raw) => raw.trim().parse::<i64>().map_err(|_| {
                ConfigError::InvalidValue(format!("USAGEFLOW_PERIOD_SECS is not an integer: {}", raw))
            })?,
            Err(_) => DEFAULT_PERIOD_SECS,
        };

        let config = Self {
            identity,
            period_secs,
            data_dir: env::var("USAGEFLOW_DATA_DIR")
                .unwrap_or_else(|_| "data/usageflow".to_string())
                .into(),
            input_path: env::var("USAGEFLOW_INPUT_PATH")
                .unwrap_or_else(|_| "streams/usage/batches.jsonl".to_string())
                .into(),
            db_path: env::var("USAGEFLOW_DB_PATH")
                .unwrap_or_else(|_| "data/usageflow/usageflow.db".to_string())
                .into(),
            sink,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "USAGEFLOW_IDENTITY cannot be empty".to_string(),
            ));
        }

        if self.identity.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue(format!(
                "USAGEFLOW_IDENTITY cannot contain path separators: {}",
                self.identity
            )));
        }

        if self.period_secs <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "USAGEFLOW_PERIOD_SECS must be positive, got {}",
                self.period_secs
            )));
        }

        Ok(())
    }
}
