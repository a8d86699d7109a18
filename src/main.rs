use anyhow::{Context, Result};
use clap::Parser;
use jiffies_ledger::cli::{Cli, Command, OutputFormat};
use jiffies_ledger::config::MonitorConfig;
use jiffies_ledger::jiffies::{JiffiesSource, ProcJiffiesSource, MILLIS_PER_JIFFY};
use jiffies_ledger::time_breaker::{
    configure_portions_with, Stamp, TimePortions, CURR_STAMP, DEFAULT_CURRENT_STAMP_DELTA,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_stamps(path: &Path) -> Result<Vec<Stamp>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid stamp list in {}", path.display()))
}

fn print_portions(portions: &TimePortions) {
    let validity = if portions.is_valid() { "valid" } else { "invalid" };
    println!("Total: {} ({})", portions.total_uptime, validity);
    println!("{:<24} {:>6} {:>12}", "KEY", "RATIO", "TIME");
    for portion in &portions.portions {
        println!(
            "{:<24} {:>5}% {:>12}",
            portion.key, portion.ratio, portion.total_millis
        );
    }
}

fn run_portions(stamps: PathBuf, window: i64, now: Option<i64>, format: OutputFormat) -> Result<()> {
    if window < 0 {
        anyhow::bail!("Invalid value for --window: {} (must be >= 0)", window);
    }
    let stamps = load_stamps(&stamps)?;
    // without --now the timeline closes at its newest stamp
    let now = now.unwrap_or_else(|| stamps.first().map_or(0, |s| s.up_time));
    tracing::debug!("portioning {} stamps, window = {}, now = {}", stamps.len(), window, now);

    let portions = configure_portions_with(&stamps, window, DEFAULT_CURRENT_STAMP_DELTA, || {
        Stamp::new(CURR_STAMP, now)
    });
    match format {
        OutputFormat::Text => print_portions(&portions),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&portions)?),
    }
    Ok(())
}

fn print_config(file: Option<PathBuf>) -> Result<()> {
    let config = match file {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn read_jiffies(pid: Option<i32>, tid: Option<i32>, proc_root: PathBuf) -> Result<()> {
    let source = ProcJiffiesSource::with_root(proc_root);
    let pid = pid.unwrap_or_else(|| source.pid());
    let tid = tid.unwrap_or(pid);
    let jiffies = source
        .read_jiffies(pid, tid)
        .with_context(|| format!("Cannot read jiffies of pid {} tid {}", pid, tid))?;
    println!(
        "pid {} tid {}: {} jiffies ({} ms)",
        pid,
        tid,
        jiffies,
        jiffies.saturating_mul(MILLIS_PER_JIFFY)
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Portions {
            stamps,
            window,
            now,
            format,
        } => run_portions(stamps, window, now, format),
        Command::Config { file } => print_config(file),
        Command::Jiffies {
            pid,
            tid,
            proc_root,
        } => read_jiffies(pid, tid, proc_root),
    }
}
