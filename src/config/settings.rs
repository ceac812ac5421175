//! Configuration settings for Pipeworks
//!
//! Defines pipe configuration, CLI arguments, and defaults.

use crate::core::DEFAULT_BUFFER_SIZE;
use crate::error::{PipeError, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeworks - background byte pumps for files, terminals and subprocesses
#[derive(Parser, Debug, Clone)]
#[command(name = "pipeworks")]
#[command(author = "Pipeworks Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pump bytes between streams on background threads")]
#[command(long_about = r#"
Pipeworks moves bytes from a source to a sink on a dedicated background thread.

Examples:
  pipeworks copy --input in.bin --output out.bin   # File to file
  pipeworks copy < in.log                          # Stdin to stdout
  pipeworks run -- sort -r                         # Feed stdin to a child
  pipeworks password                               # Read a line without echo
"#)]
pub struct CliArgs {
    /// Scratch buffer size per pipe (e.g., 1K, 64K)
    #[arg(short = 'b', long, global = true, value_name = "SIZE")]
    pub buffer_size: Option<String>,

    /// JSON configuration file
    #[arg(long, global = true, env = "PIPEWORKS_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show a progress spinner on stderr
    #[arg(short = 'p', long, global = true)]
    pub progress: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (minimal output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Pump a file (or stdin) into a file (or stdout)
    Copy {
        /// Input file, stdin when omitted
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Output file, stdout when omitted
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Run a program, feeding it our stdin and relaying its stdout
    Run {
        /// Program to execute
        #[arg(value_name = "PROGRAM")]
        program: String,

        /// Arguments passed to the program
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Read a line from the terminal with echo disabled
    Password {
        /// Prompt printed before reading
        #[arg(long, default_value = "Password: ")]
        prompt: String,
    },
}

/// Settings shared by every pipe a caller builds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Scratch buffer capacity in bytes
    pub buffer_size: usize,
    /// Name for the worker thread; a numbered default is used when unset
    pub thread_name: Option<String>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            thread_name: None,
        }
    }
}

impl PipeConfig {
    /// Load a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipeError::config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from CLI arguments, layered over an optional config file
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        if let Some(size) = &args.buffer_size {
            let bytes = parse_size(size).map_err(PipeError::Config)?;
            config.buffer_size = usize::try_from(bytes)
                .map_err(|_| PipeError::config(format!("Buffer size too large: {}", size)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Copy of this config for one of several pipes built from it; a set
    /// worker name gets `-<role>` appended so the threads stay distinct
    pub fn for_role(&self, role: &str) -> Self {
        Self {
            thread_name: self.thread_name.as_ref().map(|name| format!("{}-{}", name, role)),
            ..self.clone()
        }
    }

    /// Reject settings no pipe can run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(PipeError::InvalidBufferSize(self.buffer_size));
        }
        Ok(())
    }
}

/// Parse human-readable size (e.g., "1M", "64K", "1024")
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(|c| c == 'G' || c == 'B'), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(|c| c == 'M' || c == 'B'), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(|c| c == 'K' || c == 'B'), 1024u64)
    } else {
        (size.trim_end_matches('B'), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", size));
    }

    Ok((num * multiplier as f64) as u64)
}
