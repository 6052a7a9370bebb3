use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "apicheck")]
#[command(version)]
#[command(about = "Declarative contract tests for HTTP APIs", long_about = None)]
pub struct Cli {
    /// Test files or suite directories, run in the order given.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// JSON config holding env, headers, httpDefaults and setup/teardown hooks.
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// Write a JSON dump of every failed test under this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Sets the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Output format: plain or json (for CI systems)
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}
