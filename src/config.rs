//! Run configuration for the catalogue checker.
//!
//! Values come from the environment (an optional `.env` file is loaded first) and can
//! be overridden on the command line.

use crate::ReportFormat;
use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub const USAGE: &str = "\
Usage: check-catalogue [CATALOGUE.csv] [options]

Checks every catalogue entry's formula against its SMILES structure.
Without a catalogue path the bundled catalogue is checked.

Options:
  --output <path>       report path (MOLCHECK_REPORT, default smiles_errors.json)
  --format <json|csv>   report format (MOLCHECK_FORMAT, default json)
  --jobs <n>            worker threads, 1 = sequential (MOLCHECK_JOBS)
  --timeout-ms <n>      per-entry interpreter deadline (MOLCHECK_TIMEOUT_MS)
  --log <level>         trace, debug, info, warn or error (MOLCHECK_LOG, default info)
  --quiet               only print the summary
  --help                show this message";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Missing value for {0}")]
    MissingValue(String),
    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Catalogue CSV to check; the bundled catalogue when `None`.
    pub catalogue: Option<PathBuf>,
    pub report_path: PathBuf,
    pub report_format: ReportFormat,
    pub jobs: usize,
    pub timeout: Option<Duration>,
    pub log_level: String,
    pub quiet: bool,
    pub show_help: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalogue: None,
            report_path: PathBuf::from("smiles_errors.json"),
            report_format: ReportFormat::Json,
            jobs: thread::available_parallelism().map_or(1, |n| n.get()),
            timeout: None,
            log_level: "info".to_string(),
            quiet: false,
            show_help: false,
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_jobs(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid(key, value, "must be at least 1")),
        Ok(jobs) => Ok(jobs),
        Err(e) => Err(invalid(key, value, e)),
    }
}

fn parse_timeout(key: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    match value.trim().parse::<u64>() {
        // Zero turns the deadline off.
        Ok(0) => Ok(None),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(e) => Err(invalid(key, value, e)),
    }
}

fn parse_format(key: &str, value: &str) -> Result<ReportFormat, ConfigError> {
    value.parse().map_err(|e: anyhow::Error| invalid(key, value, e))
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds a configuration from a variable lookup, starting from the defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = lookup("MOLCHECK_CATALOGUE") {
            config.catalogue = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("MOLCHECK_REPORT") {
            config.report_path = PathBuf::from(path);
        }
        if let Some(format) = lookup("MOLCHECK_FORMAT") {
            config.report_format = parse_format("MOLCHECK_FORMAT", &format)?;
        }
        if let Some(jobs) = lookup("MOLCHECK_JOBS") {
            config.jobs = parse_jobs("MOLCHECK_JOBS", &jobs)?;
        }
        if let Some(timeout) = lookup("MOLCHECK_TIMEOUT_MS") {
            config.timeout = parse_timeout("MOLCHECK_TIMEOUT_MS", &timeout)?;
        }
        if let Some(level) = lookup("MOLCHECK_LOG") {
            config.log_level = level;
        }
        Ok(config)
    }

    /// Applies command line arguments (without the program name) on top of `self`.
    pub fn with_args<I, S>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue(arg.to_string()))
            };
            match arg {
                "--output" | "-o" => self.report_path = PathBuf::from(value()?),
                "--format" => self.report_format = parse_format(arg, &value()?)?,
                "--jobs" | "-j" => self.jobs = parse_jobs(arg, &value()?)?,
                "--timeout-ms" => self.timeout = parse_timeout(arg, &value()?)?,
                "--log" => self.log_level = value()?,
                "--quiet" | "-q" => self.quiet = true,
                "--help" | "-h" => self.show_help = true,
                flag if flag.starts_with('-') => {
                    return Err(ConfigError::UnknownArgument(flag.to_string()))
                }
                path => self.catalogue = Some(PathBuf::from(path)),
            }
            i += 1;
        }
        Ok(self)
    }
}
