//! forkpool - run builtin tasks across a bounded pool of processes.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use forkpool::{Pool, TaskRegistry, logging, runtime, tasks};
use owo_colors::{OwoColorize, Stream::Stderr};

use cli::{Cli, Commands, RunArgs};

/// Program entry point.
///
/// Child processes spawned by the pool re-enter here and never get past
/// [`runtime::run_if_child`]; everything after it is the parent.
fn main() {
    let registry = tasks::builtin_registry();
    runtime::run_if_child(&registry);

    let cli = Cli::parse();
    if cli.no_color {
        owo_colors::set_override(false);
    }
    logging::init(cli.log_config());

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args, registry),
        Commands::Tasks => cmd_tasks(&registry),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Submit every task, print results as JSON lines as they are handled and
/// fail if any task failed or timed out.
fn cmd_run(cli: &Cli, args: &RunArgs, registry: TaskRegistry) -> Result<()> {
    let mut pool =
        Pool::new(args.pool_config(), registry).context("Failed to create process pool")?;

    for (index, spec) in args.tasks.iter().enumerate() {
        let job = spec.to_job()?;
        let quiet = cli.quiet;
        pool.add_with_limit(job, args.max_output)
            .with_context(|| format!("Failed to submit task #{}", index + 1))?
            .then(|value| println!("{}", value))
            .catch(move |err| {
                if !quiet {
                    eprintln!(
                        "{} task #{}: {}",
                        "failed".if_supports_color(Stderr, |text| text.red()),
                        index + 1,
                        err
                    );
                }
            })
            .on_timeout(move || {
                if !quiet {
                    eprintln!(
                        "{} task #{}",
                        "timed out".if_supports_color(Stderr, |text| text.yellow()),
                        index + 1
                    );
                }
            });
    }

    let progress = args.progress && !cli.quiet;
    pool.wait_with(|pool| {
        if progress {
            eprintln!("{}", pool.status().summary());
        }
    })?;

    if args.status {
        println!("{}", pool.status());
    }

    let failed = pool.failed().len();
    let timed_out = pool.timeouts().len();
    if failed + timed_out > 0 {
        bail!(
            "{} of {} tasks did not finish ({} failed, {} timed out)",
            failed + timed_out,
            args.tasks.len(),
            failed,
            timed_out
        );
    }
    Ok(())
}

fn cmd_tasks(registry: &TaskRegistry) -> Result<()> {
    for kind in registry.kinds() {
        println!("{}", kind);
    }
    Ok(())
}
