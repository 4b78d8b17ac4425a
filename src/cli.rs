//! Command-line interface for the family dashboard
//!
//! This module defines the argument surface with clap: one subcommand per
//! view, plus flags for the config file and the cache directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::cache::FileCache;

/// Error types for CLI startup
#[derive(Debug, Error)]
pub enum CliError {
    /// The platform has no usable cache directory and none was given
    #[error("could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// Family dashboard CLI - weather, shared calendars, and task lists
#[derive(Parser, Debug)]
#[command(name = "famdash")]
#[command(about = "View family dashboard data: weather, shared calendars, and task lists")]
#[command(version)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, value_name = "FILE", default_value = "config.json")]
    pub config: PathBuf,

    /// Cache directory override
    ///
    /// Defaults to the platform cache directory. Mostly useful for keeping
    /// several dashboards (or test runs) apart.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Which view to print as JSON
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Current conditions, today's outlook, and the week's forecast
    Weather,
    /// The coming week's events across all configured calendars
    Calendar,
    /// Every configured task list merged into one ordered list
    Tasks,
    /// Source health and when each source last fetched successfully
    Status,
    /// All of the above in a single response
    All,
}

/// Resolves the cache from CLI arguments.
///
/// An explicit `--cache-dir` always wins; otherwise the platform cache
/// directory is used.
pub fn cache_from_cli(cli: &Cli) -> Result<FileCache, CliError> {
    match &cli.cache_dir {
        Some(dir) => Ok(FileCache::with_dir(dir.clone())),
        None => FileCache::new().ok_or(CliError::NoCacheDir),
    }
}
