use std::time::Duration;

use cgilink::frame::DEFAULT_MAX_LINE_LENGTH;
use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

/// Time the runtime gets to wind down background tasks before exit.
///
/// A blocking stdin read cannot be cancelled; without a bound the process
/// would wait for the peer to close its end.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve built-in handlers over stdin/stdout.
    Serve(ServeArgs),
    /// Spawn a backend, send one request and print the reply.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Longest accepted line in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,
    /// Time in-flight handlers get once stdin closes (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub drain_timeout: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Message type of the request.
    pub msg_type: String,
    /// JSON payload. Defaults to `null`.
    #[arg(long)]
    pub json: Option<String>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Longest accepted line in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,
    /// Backend program and its arguments, after `--`.
    #[arg(last = true, required = true, value_name = "PROGRAM")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn build_runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
