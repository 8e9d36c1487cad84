// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `backdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "backdag",
    version,
    about = "Run backup pipelines over a dependency graph of objects.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "backdag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// Overrides the config file's `[settings] verbosity`. If omitted,
    /// `BACKDAG_LOG` or the config value is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a backup task from the config.
    Run {
        /// Task id to run (default: "default").
        task: Option<String>,

        /// Parse + validate, print the job plan, but don't execute anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Load and validate the config, print the parsed structure.
    Config,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
