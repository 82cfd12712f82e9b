use std::io::Write;

use workpool_pool::{PoolConfig, ProcessPool, WorkerCommand};

use crate::cmd::SendArgs;
use crate::exit::{io_error, pool_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let mut parts = args.worker_command.into_iter();
    let program = parts
        .next()
        .ok_or_else(|| CliError::new(USAGE, "missing worker command"))?;
    let command = WorkerCommand::new(program).args(parts);

    let mut pool = ProcessPool::new(PoolConfig::new(1, 1, 1, command))
        .map_err(|err| pool_error("starting pool", err))?;

    let worker = pool
        .start_process()
        .map_err(|err| pool_error("checking out worker", err))?;
    worker
        .send_request(args.data.as_bytes())
        .map_err(|err| pool_error("sending request", err))?;
    let response = worker
        .get_stdout_response()
        .map_err(|err| pool_error("reading response", err))?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&response)
        .and_then(|()| writeln!(stdout))
        .map_err(|err| io_error("writing response", err))?;

    if args.with_stderr {
        let captured = worker
            .get_stderr_response()
            .map_err(|err| pool_error("reading stderr", err))?;
        if !captured.is_empty() {
            eprint!("{captured}");
        }
    }

    pool.release_process(worker)
        .map_err(|err| pool_error("releasing worker", err))?;
    pool.shut_down();
    Ok(SUCCESS)
}
