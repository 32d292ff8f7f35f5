//! # Cli
//!
//! This module contains everything needed for parsing the CLI arguments for tmplc.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Struct containing the CLI configuration for tmplc.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The path to the template file.
    #[arg(index = 1)]
    pub template: PathBuf,

    /// Seed the environment with `NAME=value` before running the template.
    /// Repeatable.
    #[arg(short = 'D', long = "define", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// A positional template argument (bound via `#template`/`ARG`).
    /// Repeatable, in declaration order.
    #[arg(short, long = "arg")]
    pub args: Vec<String>,

    /// Base directory the template path is resolved against.
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Base directory derived output paths are rewritten into.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Specify the log level of the preprocessor.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected NAME=value, found '{raw}'"))
}

/// Enum for specifying the log level of tmplc.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also logs warnings, such as interpolation fallbacks to `NODATA`.
    #[value(alias("1"))]
    Warn,

    /// Also logs which files are read and written.
    #[value(alias("2"))]
    Info,

    /// Logs everything, including bytecode-level detail.
    #[value(alias("3"))]
    Debug,

    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
