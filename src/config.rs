//! Per-operation latency configuration.

use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;

/// Emulated latencies of a tape device, in nanoseconds.
///
/// All fields default to zero, which disables latency emulation entirely.
/// Loaded from a line-oriented `key value` file (see [`DelayConfig::load`])
/// or filled in directly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    /// Cost of one device read.
    pub read_delay: u64,
    /// Cost of one device write.
    pub write_delay: u64,
    /// Fixed cost of a rewind (`seek`).
    pub rewind_delay: u64,
    /// Additional rewind cost per cell travelled.
    pub rewind_step_delay: u64,
    /// Cost of a single head step (`next`/`prev`).
    pub next_delay: u64,
}

/// Delay configuration loading error.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be opened or read.
    Io(io::Error),
    /// A line is not a `key value` pair with a non-negative integer value.
    Malformed(String),
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Malformed(_) => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::Io(err) => write!(f, "configuration file not readable: {}", err),
            ConfigError::Malformed(line) => write!(f, "malformed configuration line: {:?}", line),
        }
    }
}

impl DelayConfig {
    /// Loads a delay configuration from `path`. A missing file yields the
    /// all-zero default.
    pub fn load(path: impl AsRef<Path>) -> Result<DelayConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(DelayConfig::default());
        }

        let file = fs::File::open(path).map_err(ConfigError::Io)?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// Parses `key value` lines, one delay per line, whitespace separated.
    /// Values are nanosecond counts. Empty lines are skipped, tokens after
    /// the value are ignored, and unknown keys are logged and skipped
    /// rather than rejected.
    pub fn from_reader(reader: impl BufRead) -> Result<DelayConfig, ConfigError> {
        let mut config = DelayConfig::default();

        for line in reader.lines() {
            let line = line.map_err(ConfigError::Io)?;
            let mut tokens = line.split_whitespace();

            let key = match tokens.next() {
                Some(key) => key,
                None => continue,
            };
            let value = tokens
                .next()
                .and_then(|raw| raw.parse::<u64>().ok())
                .ok_or_else(|| ConfigError::Malformed(line.clone()))?;

            match key {
                "read-delay" => config.read_delay = value,
                "write-delay" => config.write_delay = value,
                "rewind-step-delay" => config.rewind_step_delay = value,
                "rewind-delay" => config.rewind_delay = value,
                "next-delay" => config.next_delay = value,
                unknown => log::warn!("unknown delay configuration key: {}", unknown),
            }
        }

        return Ok(config);
    }
}
