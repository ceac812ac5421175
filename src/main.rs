//! Pipeworks CLI - background byte pumps from the command line

use anyhow::Context;
use clap::Parser;
use pipeworks::config::{CliArgs, Commands, PipeConfig};
use pipeworks::core::{ClosingPipe, Pipe, PipeState};
use pipeworks::progress::{ProgressReporter, ProgressSummary};
use pipeworks::stream::RevivableSource;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the progress display is refreshed while waiting on a pipe
const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// Exit code for a run cut short by SIGINT
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; -v raises the default level when RUST_LOG is unset
    let default_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: CliArgs) -> anyhow::Result<i32> {
    let config = PipeConfig::from_cli(&args)?;
    tracing::debug!(buffer_size = config.buffer_size, "configuration loaded");

    let progress = if args.progress && !args.quiet {
        ProgressReporter::new("pipeworks")
    } else {
        ProgressReporter::disabled()
    };

    match &args.command {
        Commands::Copy { input, output } => cmd_copy(&config, input.as_deref(), output.as_deref(), progress, &args),
        Commands::Run { program, args: child_args } => cmd_run(&config, program, child_args, progress),
        Commands::Password { prompt } => cmd_password(prompt, args.quiet),
    }
}

fn open_input(input: Option<&Path>) -> anyhow::Result<Box<dyn Read + Send>> {
    Ok(match input {
        Some(path) => Box::new(File::open(path).with_context(|| format!("opening {}", path.display()))?),
        None => Box::new(io::stdin()),
    })
}

fn open_output(output: Option<&Path>) -> anyhow::Result<Box<dyn Write + Send>> {
    Ok(match output {
        Some(path) => Box::new(File::create(path).with_context(|| format!("creating {}", path.display()))?),
        None => Box::new(io::stdout()),
    })
}

fn is_regular_file(input: Option<&Path>) -> bool {
    input
        .and_then(|path| std::fs::metadata(path).ok())
        .map_or(false, |meta| meta.is_file())
}

/// Wait for `pipe` to finish, refreshing the progress display meanwhile
fn wait_with_progress<R, W>(pipe: &Pipe<R, W>, progress: &ProgressReporter) {
    let stats = pipe.stats();
    while !pipe.join_timeout(PROGRESS_TICK) {
        progress.observe(&stats);
    }
    progress.observe(&stats);
}

fn cmd_copy(
    config: &PipeConfig,
    input: Option<&Path>,
    output: Option<&Path>,
    progress: ProgressReporter,
    args: &CliArgs,
) -> anyhow::Result<i32> {
    // An idle input (terminal, FIFO) would otherwise keep the worker in a
    // read that a stop cannot interrupt. Regular files always reach EOF.
    let mut source = open_input(input)?;
    #[cfg_attr(not(unix), allow(unused_assignments, unused_variables))]
    let mut kill = None;
    if !is_regular_file(input) {
        let revivable = RevivableSource::new(source)?;
        kill = Some(revivable.kill_switch());
        source = Box::new(revivable);
    }
    let pipe = Pipe::with_config(source, open_output(output)?, config)?;

    #[cfg(unix)]
    {
        let controller = pipe.controller();
        if !pipeworks::console::try_register("INT", move || {
            if let Some(kill) = &kill {
                kill.kill();
            }
            controller.stop(false);
            false
        }) {
            tracing::warn!("SIGINT will terminate without flushing");
        }
    }

    progress.set_status("copying");
    pipe.start();
    wait_with_progress(&pipe, &progress);

    let interrupted = pipe.state() == PipeState::Stopped;
    let summary = ProgressSummary::from_stats(&pipe.stats());
    if let Some((_, mut sink)) = pipe.into_inner() {
        sink.flush().context("flushing output")?;
    }

    if interrupted {
        progress.finish_error("interrupted");
        return Ok(EXIT_INTERRUPTED);
    }
    progress.finish_success("done");

    if args.verbose > 0 && !args.quiet {
        summary.print();
    }
    Ok(0)
}

fn cmd_run(
    config: &PipeConfig,
    program: &str,
    child_args: &[String],
    progress: ProgressReporter,
) -> anyhow::Result<i32> {
    let mut child = Command::new(program)
        .args(child_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("starting {}", program))?;

    let child_stdin = child.stdin.take().context("child stdin was not captured")?;
    let child_stdout = child.stdout.take().context("child stdout was not captured")?;

    // The child must not take our stdin down with it
    let source = RevivableSource::new(io::stdin())?;
    let kill = source.kill_switch();

    let feed = ClosingPipe::with_config(source, child_stdin, &config.for_role("feed"))?;
    let relay = Pipe::with_config(child_stdout, io::stdout(), &config.for_role("relay"))?;

    // Interrupts reach the child directly; it decides when we are done
    #[cfg(unix)]
    pipeworks::console::try_register("INT", || false);

    feed.start();
    relay.start();
    progress.set_status(program);
    wait_with_progress(&relay, &progress);

    let status = child.wait().with_context(|| format!("waiting for {}", program))?;
    tracing::debug!(%status, "child exited");

    kill.kill();
    feed.join();

    progress.finish_success(&status.to_string());
    Ok(status.code().unwrap_or(EXIT_INTERRUPTED))
}

#[cfg(unix)]
fn cmd_password(prompt: &str, quiet: bool) -> anyhow::Result<i32> {
    eprint!("{}", prompt);
    io::stderr().flush()?;

    let line = pipeworks::console::read_password(io::stdin().lock())?;
    eprintln!();

    if !quiet {
        println!("Read {} characters", line.chars().count());
    }
    Ok(0)
}

#[cfg(not(unix))]
fn cmd_password(_prompt: &str, _quiet: bool) -> anyhow::Result<i32> {
    anyhow::bail!("password input requires a unix terminal")
}
