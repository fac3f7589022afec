//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use forkpool::PoolConfig;
use forkpool::logging::{LogConfig, LogFormat, LogRotation};
use forkpool::tasks::TaskSpec;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Run builtin tasks across a bounded pool of processes.
#[derive(Parser, Debug)]
#[command(name = "forkpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress everything but results and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, env = "FORKPOOL_LOG_FORMAT")]
    pub log_format: Option<LogFormatArg>,

    /// Also write logs to this file.
    #[arg(long, global = true, env = "FORKPOOL_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Rotation of the log file: hourly, daily or never.
    #[arg(long, global = true, env = "FORKPOOL_LOG_ROTATION")]
    pub log_rotation: Option<LogRotation>,

    /// Log span timing when spans close.
    #[arg(long, global = true, env = "FORKPOOL_LOG_SPANS")]
    pub log_spans: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Logging configuration: flags first, then environment.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::new();
        if self.quiet {
            config = config.with_filter("error".into());
        } else if self.verbose > 0 {
            let level = match self.verbose {
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            };
            config = config.with_filter(format!("forkpool={}", level.to_string().to_lowercase()));
        }
        if let Some(format) = self.log_format {
            config = config.with_format(format.into());
        }
        if let Some(path) = &self.log_file {
            config = config.with_file(path.clone());
        }
        if let Some(rotation) = self.log_rotation {
            config = config.with_rotation(rotation);
        }
        if self.log_spans {
            config = config.with_span_events(true);
        }
        config.with_env_overrides()
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit builtin tasks and wait for them.
    Run(RunArgs),

    /// List the builtin tasks.
    Tasks,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Tasks to submit: square:N, sleep:MS[:VALUE], fail:KIND:MESSAGE, repeat:N, env:NAME.
    #[arg(required = true, value_parser = parse_task)]
    pub tasks: Vec<TaskSpec>,

    /// Maximum number of simultaneous processes.
    #[arg(short = 'j', long, env = "FORKPOOL_CONCURRENCY", default_value_t = forkpool::config::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Seconds before a running process is killed.
    #[arg(short, long, env = "FORKPOOL_TIMEOUT", default_value_t = 300.0)]
    pub timeout: f64,

    /// Microseconds between liveness checks.
    #[arg(long, env = "FORKPOOL_POLL_INTERVAL", default_value_t = 50_000)]
    pub poll_interval: u64,

    /// Environment file loaded by every child before it runs its task.
    #[arg(long, env = "FORKPOOL_BOOTSTRAP")]
    pub bootstrap: Option<PathBuf>,

    /// Executable spawned for every child (default: this binary).
    #[arg(long, env = "FORKPOOL_BINARY")]
    pub binary: Option<PathBuf>,

    /// Run every task inline instead of in child processes.
    #[arg(long, env = "FORKPOOL_SYNC")]
    pub sync: bool,

    /// Maximum length of a child's encoded output, in bytes.
    #[arg(long, default_value_t = forkpool::protocol::DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output: usize,

    /// Print the pool status when done.
    #[arg(long)]
    pub status: bool,

    /// Print the status summary on every poll tick.
    #[arg(long)]
    pub progress: bool,
}

impl RunArgs {
    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new()
            .with_concurrency(self.concurrency)
            .with_timeout_secs(self.timeout)
            .with_poll_interval(Duration::from_micros(self.poll_interval))
            .with_force_synchronous(self.sync);
        if let Some(path) = &self.bootstrap {
            config = config.with_bootstrap(path.clone());
        }
        if let Some(path) = &self.binary {
            config = config.with_binary(path.clone());
        }
        config
    }
}

fn parse_task(s: &str) -> Result<TaskSpec, String> {
    s.parse()
}

/// Log format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    Pretty,
    #[default]
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "forkpool", "run", "-j", "2", "--timeout", "1.5", "--sync", "square:3", "env:HOME",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.tasks.len(), 2);

        let config = args.pool_config();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert!(config.force_synchronous);
    }

    #[test]
    fn test_bad_task_is_rejected() {
        assert!(Cli::try_parse_from(["forkpool", "run", "cube:3"]).is_err());
        assert!(Cli::try_parse_from(["forkpool", "run"]).is_err());
    }

    #[test]
    fn test_log_file_options() {
        let cli = Cli::try_parse_from([
            "forkpool",
            "--log-file",
            "/tmp/forkpool.log",
            "--log-rotation",
            "daily",
            "--log-spans",
            "tasks",
        ])
        .unwrap();
        assert_eq!(cli.log_rotation, Some(LogRotation::Daily));
        assert!(cli.log_spans);
        assert!(Cli::try_parse_from(["forkpool", "--log-rotation", "weekly", "tasks"]).is_err());
    }

    #[test]
    fn test_verbosity_sets_filter() {
        let cli = Cli::try_parse_from(["forkpool", "-vv", "tasks"]).unwrap();
        assert_eq!(cli.log_config().filter.as_deref(), Some("forkpool=debug"));
    }
}
