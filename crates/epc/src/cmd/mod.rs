use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod echo;
pub mod methods;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server and print its port.
    Echo(EchoArgs),
    /// Call a method on a running server.
    Call(CallArgs),
    /// List the methods a server exposes.
    Methods(MethodsArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Methods(args) => methods::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Port to bind. 0 picks an ephemeral port.
    #[arg(long, default_value = "0")]
    pub port: u16,
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,
    /// Handle each request on its own thread.
    #[arg(long)]
    pub threaded: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Port of the server.
    pub port: u16,
    /// Method to invoke.
    pub method: String,
    /// Arguments, one s-expression each.
    pub args: Vec<String>,
    /// Host of the server.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MethodsArgs {
    /// Port of the server.
    pub port: u16,
    /// Host of the server.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
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
