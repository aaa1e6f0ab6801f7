//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a target and print its aggregated results
    Run {
        /// Target specification file (YAML or JSON)
        #[arg(long, value_name = "PATH")]
        target: PathBuf,

        /// Stop the run after this long (example: --stop-after=30s)
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        stop_after: Option<std::time::Duration>,

        /// Also print per-invocation results
        #[arg(long)]
        invocations: bool,
    },

    /// Validate a target specification and print its normalised form
    Validate {
        /// Target specification file (YAML or JSON)
        #[arg(long, value_name = "PATH")]
        target: PathBuf,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Print a sample configuration
    Sample,
}
