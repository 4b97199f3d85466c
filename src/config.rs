//! Configuration management for the GPU miner
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::device::emulated::{DEFAULT_BLOCK_SIZE, DEFAULT_GRID_SIZE};
use crate::device::EmulatedDeviceConfig;
use crate::hasher::{HasherKind, InputLayout, DEFAULT_HEADER_LEN};
use crate::types::Target;
use crate::worker::MAX_WORKER_NUM;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on hashes one kernel launch may attempt
pub const MAX_NONCES_PER_LAUNCH: u64 = 1 << 32;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Hasher variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantChoice {
    /// Let the device backend pick
    Auto,
    /// Kernel that mutates the input in place
    Inline,
    /// Kernel that copies the input per thread
    Reference,
}

impl VariantChoice {
    /// Forced hasher kind, or `None` for auto
    pub fn kind(self) -> Option<HasherKind> {
        match self {
            VariantChoice::Auto => None,
            VariantChoice::Inline => Some(HasherKind::Inline),
            VariantChoice::Reference => Some(HasherKind::Reference),
        }
    }
}

impl fmt::Display for VariantChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantChoice::Auto => write!(f, "auto"),
            VariantChoice::Inline => write!(f, "inline"),
            VariantChoice::Reference => write!(f, "reference"),
        }
    }
}

/// Complete configuration for the miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "alephium-gpu-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Alephium GPU mining worker pool",
    long_about = "Runs a pool of BLAKE3 mining workers over emulated GPU devices, fed by a synthetic job source"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Number of emulated devices
    #[arg(short = 'd', long, env = "ALEPHIUM_GPU_DEVICES", default_value = "1")]
    #[serde(default = "default_devices")]
    pub devices: usize,

    /// Workers per device
    #[arg(short = 'w', long, default_value = "4")]
    #[serde(default = "default_workers_per_device")]
    pub workers_per_device: usize,

    /// Hasher variant
    #[arg(long, default_value = "auto")]
    #[serde(default = "default_variant")]
    pub variant: VariantChoice,

    /// Kernel grid size (blocks per launch)
    #[arg(long)]
    #[serde(default)]
    pub grid_size: Option<u32>,

    /// Kernel block size (threads per block)
    #[arg(long)]
    #[serde(default)]
    pub block_size: Option<u32>,

    /// Nonces tried by each thread per launch
    #[arg(long, default_value = "16")]
    #[serde(default = "default_nonces_per_thread")]
    pub nonces_per_thread: u32,

    /// Block header length in bytes
    #[arg(long, default_value = "302")]
    #[serde(default = "default_header_len")]
    pub header_len: usize,

    /// Mining target as big-endian hex (at most 32 bytes)
    #[arg(short = 't', long, default_value = "00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")]
    #[serde(default = "default_target")]
    pub target: String,

    /// Interval between synthetic job rounds (e.g. "2s")
    #[arg(long, default_value = "2s")]
    #[serde(default = "default_job_interval")]
    pub job_interval: String,

    /// Length of the random transaction blob in synthetic jobs
    #[arg(long, default_value = "64")]
    #[serde(default = "default_txs_len")]
    pub txs_len: usize,

    /// Interval between hash rate reports (e.g. "10s")
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_stats_interval")]
    pub stats_interval: String,

    /// Append found blocks to this file instead of logging them
    #[arg(short = 'o', long, value_name = "FILE")]
    #[serde(default)]
    pub block_output: Option<PathBuf>,
}

impl Config {
    /// Load configuration from CLI and, if given, a config file
    pub async fn load() -> Result<Self> {
        let mut config = Self::parse();

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config.
    ///
    /// A CLI value wins unless it is still the built-in default.
    fn merge_with_file(mut self, file: Self) -> Self {
        fn pick<T: PartialEq>(cli: &mut T, file: T, default: T) {
            if *cli == default {
                *cli = file;
            }
        }

        pick(&mut self.log_level, file.log_level, default_log_level());
        pick(&mut self.log_format, file.log_format, default_log_format());
        pick(&mut self.devices, file.devices, default_devices());
        pick(
            &mut self.workers_per_device,
            file.workers_per_device,
            default_workers_per_device(),
        );
        pick(&mut self.variant, file.variant, default_variant());
        pick(
            &mut self.nonces_per_thread,
            file.nonces_per_thread,
            default_nonces_per_thread(),
        );
        pick(&mut self.header_len, file.header_len, default_header_len());
        pick(&mut self.target, file.target, default_target());
        pick(&mut self.job_interval, file.job_interval, default_job_interval());
        pick(&mut self.txs_len, file.txs_len, default_txs_len());
        pick(
            &mut self.stats_interval,
            file.stats_interval,
            default_stats_interval(),
        );

        if self.log_file.is_none() {
            self.log_file = file.log_file;
        }
        if self.grid_size.is_none() {
            self.grid_size = file.grid_size;
        }
        if self.block_size.is_none() {
            self.block_size = file.block_size;
        }
        if self.block_output.is_none() {
            self.block_output = file.block_output;
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.devices == 0 {
            return Err(Error::config("Device count must be greater than 0"));
        }

        if self.workers_per_device == 0 {
            return Err(Error::config("Workers per device must be greater than 0"));
        }

        let total = self.devices.saturating_mul(self.workers_per_device);
        if total > MAX_WORKER_NUM {
            return Err(Error::config(format!(
                "{} workers requested, at most {} supported",
                total, MAX_WORKER_NUM
            )));
        }

        if self.header_len == 0 {
            return Err(Error::config("Header length must be greater than 0"));
        }

        if self.nonces_per_thread == 0 {
            return Err(Error::config("Nonces per thread must be greater than 0"));
        }

        if self.grid_size == Some(0) || self.block_size == Some(0) {
            return Err(Error::config("Grid and block sizes must be greater than 0"));
        }

        let per_launch = u64::from(self.grid_size.unwrap_or(DEFAULT_GRID_SIZE))
            .checked_mul(u64::from(self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)))
            .and_then(|threads| threads.checked_mul(u64::from(self.nonces_per_thread)))
            .filter(|n| *n <= MAX_NONCES_PER_LAUNCH);
        if per_launch.is_none() {
            return Err(Error::config(format!(
                "Grid size, block size and nonces per thread allow at most {} nonces per launch",
                MAX_NONCES_PER_LAUNCH
            )));
        }

        self.target()?;
        self.job_interval()?;
        self.stats_interval()?;

        Ok(())
    }

    /// Get parsed mining target
    pub fn target(&self) -> Result<Target> {
        Target::from_str(&self.target)
    }

    /// Get the hash input layout for the configured header length
    pub fn layout(&self) -> InputLayout {
        InputLayout::new(self.header_len)
    }

    /// Get job interval duration
    pub fn job_interval(&self) -> Result<Duration> {
        parse_duration("job_interval", &self.job_interval)
    }

    /// Get stats interval duration
    pub fn stats_interval(&self) -> Result<Duration> {
        parse_duration("stats_interval", &self.stats_interval)
    }

    /// Shape of the emulated device set
    pub fn emulated_device_config(&self) -> EmulatedDeviceConfig {
        EmulatedDeviceConfig {
            devices: self.devices,
            variant: self.variant.kind(),
            grid_size: self.grid_size,
            block_size: self.block_size,
            nonces_per_thread: self.nonces_per_thread,
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("Invalid {} '{}': {}", field, value, e)))?;
    if duration.is_zero() {
        return Err(Error::config(format!("{} must be greater than 0", field)));
    }
    Ok(duration)
}

// Default value functions for serde
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
fn default_devices() -> usize { 1 }
fn default_workers_per_device() -> usize { 4 }
fn default_variant() -> VariantChoice { VariantChoice::Auto }
fn default_nonces_per_thread() -> u32 { 16 }
fn default_header_len() -> usize { DEFAULT_HEADER_LEN }
fn default_target() -> String { format!("00{}", "ff".repeat(31)) }
fn default_job_interval() -> String { "2s".to_string() }
fn default_txs_len() -> usize { 64 }
fn default_stats_interval() -> String { "10s".to_string() }
