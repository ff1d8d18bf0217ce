use std::{env, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{Error, Result};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MAX_RECORD_SIZE: usize = 32 * 1024 * 1024;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Settings for opening an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the write-ahead log
    pub data_dir: PathBuf,
    /// Largest serialized event accepted by the log, in bytes
    pub max_record_size: usize,
    /// Pause between two expiry sweeps
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// fsync after every append instead of only flushing to the OS
    pub sync_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sync_writes: false,
        }
    }
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `DRIFTKV_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = var("DRIFTKV_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = var("DRIFTKV_MAX_RECORD_SIZE") {
            config.max_record_size = parse("DRIFTKV_MAX_RECORD_SIZE", &size)?;
        }
        if let Some(ms) = var("DRIFTKV_SWEEP_INTERVAL_MS") {
            config.sweep_interval = Duration::from_millis(parse("DRIFTKV_SWEEP_INTERVAL_MS", &ms)?);
        }
        if let Some(sync) = var("DRIFTKV_SYNC_WRITES") {
            config.sync_writes = parse("DRIFTKV_SYNC_WRITES", &sync)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep_interval must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn with_max_record_size(mut self, max_record_size: usize) -> Self {
        self.max_record_size = max_record_size;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", name, raw)))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
