//! CLI parse: clap types for rdtk. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// rdtk CLI - catalogue, query and read recorded data
#[derive(Parser)]
#[command(name = "rdtk")]
#[command(about = "Catalogue, query and read heterogeneous recorded-data files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (configuration lookup and default base dir)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable logging entirely
    #[arg(long, short)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Catalogue operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// List registered models, highest priority first
    Models {
        /// Output format (text or json)
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate metadata for a file and print it
    Meta {
        /// Data file to describe
        file: PathBuf,
        /// Content name to describe the file under
        #[arg(long)]
        contents: Option<String>,
        /// Record ID to attach
        #[arg(long)]
        record_id: Option<String>,
        /// Write the result to `<file>.json`
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// List catalogue entries
    List {
        /// What to list
        #[arg(value_enum)]
        target: ListTarget,
        #[command(flatten)]
        database: DatabaseArgs,
        /// PQL filter, e.g. "record_id == 'r1' and start_timestamp > 10"
        #[arg(long)]
        pql: Option<String>,
        #[arg(long)]
        offset: Option<usize>,
        /// Zero means unlimited
        #[arg(long)]
        limit: Option<usize>,
        /// Output format (text or json)
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Ingest every `*.json` metadata file under a directory
    Ingest {
        root: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Add one metadata document, or a list of them, read from stdin
    Add {
        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Database ID the catalogue belongs to
    #[arg(long, short = 'd', default_value = "default")]
    pub database_id: String,
    /// Directory file paths are stored relative to (default: workspace)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    Databases,
    Records,
    Files,
    Contents,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
