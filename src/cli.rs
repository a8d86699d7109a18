//! CLI argument parsing for jiffies-ledger

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for portion reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "jiffies-ledger")]
#[command(version)]
#[command(about = "Replay stamp timelines and inspect CPU jiffies accounting", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split a recorded newest-first stamp list into per-key portions
    Portions {
        /// JSON array of {"key", "up_time"} stamps, newest first
        #[arg(long, value_name = "FILE")]
        stamps: PathBuf,

        /// Only cover the trailing MS of history (0 = everything)
        #[arg(long, value_name = "MS", default_value = "0", allow_negative_numbers = true)]
        window: i64,

        /// Close the timeline at this uptime instead of the newest stamp
        #[arg(long, value_name = "UPTIME")]
        now: Option<i64>,

        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective monitor configuration as TOML
    Config {
        /// TOML file to load; defaults apply to missing fields
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Read the CPU jiffies of a thread from procfs
    Jiffies {
        /// Process id (defaults to this process)
        #[arg(short = 'p', long = "pid", value_name = "PID")]
        pid: Option<i32>,

        /// Thread id (defaults to the process's main thread)
        #[arg(short = 't', long = "tid", value_name = "TID")]
        tid: Option<i32>,

        /// procfs mount point
        #[arg(long = "proc-root", value_name = "DIR", default_value = "/proc")]
        proc_root: PathBuf,
    },
}
