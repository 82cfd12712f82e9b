use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod send;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bundled demo request handler over stdin/stdout.
    Worker(WorkerArgs),
    /// Spawn a one-worker pool, send a single request, print the response.
    Send(SendArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Worker(args) => worker::run(args),
        Command::Send(args) => send::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct WorkerArgs {}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Request payload.
    #[arg(long, short = 'd')]
    pub data: String,

    /// Print stderr captured from the worker after the response.
    #[arg(long)]
    pub with_stderr: bool,

    /// Worker command line (program followed by its arguments).
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub worker_command: Vec<String>,
}
