mod actions;
mod conditions;
mod config;
mod runner;
mod status;
mod watcher;

use clap::Parser;
use config::StopwatcherConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use watcher::WatchOutcome;

/// Watch for a stop condition and run a stop action exactly once when it
/// appears: a STOP file, a process exiting, a log line, or a deadline.
#[derive(Parser, Debug)]
#[command(name = "stopwatcher", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "stopwatcher.toml")]
    config: PathBuf,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop when this file appears (overrides config)
    #[arg(long)]
    stop_file: Option<PathBuf>,

    /// Stop when this process exits (overrides config)
    #[arg(long)]
    pid: Option<i32>,

    /// Stop after this many seconds (overrides config)
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Signal to send when stopping, e.g. TERM (requires --signal-pid)
    #[arg(long)]
    signal: Option<String>,

    /// Process to signal when stopping
    #[arg(long)]
    signal_pid: Option<i32>,

    /// Status file path (overrides config)
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every poll decision)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Stop command and its arguments (overrides config)
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    /// Merge CLI overrides into a loaded config.
    fn apply_to(&self, config: &mut StopwatcherConfig) {
        if let Some(ms) = self.interval_ms {
            config.watcher.poll_interval_ms = ms;
        }
        if let Some(path) = &self.stop_file {
            config.condition.stop_file = Some(path.clone());
        }
        if let Some(pid) = self.pid {
            config.condition.pid = Some(pid);
        }
        if let Some(secs) = self.deadline_secs {
            config.condition.deadline_secs = Some(secs);
        }
        if let Some(signal) = &self.signal {
            config.action.signal = Some(signal.clone());
        }
        if let Some(pid) = self.signal_pid {
            config.action.pid = Some(pid);
        }
        if let Some(path) = &self.status_file {
            config.status.file = Some(path.clone());
        }
        if let Some((command, args)) = self.command.split_first() {
            config.action.command = Some(command.clone());
            config.action.args = args.to_vec();
        }
    }

    fn log_filter(&self) -> EnvFilter {
        if self.verbose {
            EnvFilter::new("debug")
        } else if self.quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    cli.apply_to(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "config validation failed");
        std::process::exit(1);
    }

    if cli.dry_run {
        println!("stopwatcher v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("{config:#?}");
        println!("Dry run: config validated, not running.");
        return;
    }

    match runner::run(&config).await {
        Ok(WatchOutcome::Triggered { checks }) => {
            tracing::info!(checks, "stop action completed");
        }
        Ok(WatchOutcome::Cancelled { checks }) => {
            tracing::info!(checks, "watch cancelled before stop condition");
        }
        Err(e) => {
            tracing::error!(error = %e, "stopwatcher failed");
            std::process::exit(1);
        }
    }
}
