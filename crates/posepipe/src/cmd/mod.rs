use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use posepipe_transport::DEFAULT_ENDPOINT;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod host;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulated host that publishes device poses every tick.
    Host(HostArgs),
    /// Connect as a client and print device updates.
    Watch(WatchArgs),
    /// Send a single command to the host.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Socket path to listen on.
    #[arg(long, env = "POSEPIPE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: PathBuf,
    /// Number of simulated devices.
    #[arg(long, default_value = "3")]
    pub devices: usize,
    /// Tick rate in Hz.
    #[arg(long, default_value = "90", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub rate: u32,
    /// Stop after N ticks. Default: run until interrupted.
    #[arg(long)]
    pub ticks: Option<u64>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Socket path to connect to.
    #[arg(long, env = "POSEPIPE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: PathBuf,
    /// Exit after printing N updates.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit instead of reconnecting when the host goes away.
    #[arg(long)]
    pub no_auto_reconnect: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    #[arg(long, env = "POSEPIPE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: PathBuf,
    /// Command name.
    #[arg(long)]
    pub name: String,
    /// Command parameters, passed through uninterpreted.
    #[arg(long, default_value = "")]
    pub params: String,
    /// How long to wait for a busy endpoint (e.g. 15s, 500ms).
    #[arg(long, default_value = "15s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Flag cleared by Ctrl-C.
pub(crate) fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
