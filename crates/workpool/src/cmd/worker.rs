//! The bundled demo/test request handler.
//!
//! Used by the integration suite and by `workpool send` demos. Requests are
//! interpreted as UTF-8 command text; anything unrecognised is answered
//! with the hex MD5 digest of the raw payload, which makes byte-exact round
//! trips easy to assert from the host side.

use std::io::Write;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use workpool_worker::{run_stdio, Flow, HandlerError, MessageHandler, ResponseSink, WorkerError};

use crate::cmd::WorkerArgs;
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};

pub fn run(_args: WorkerArgs) -> CliResult<i32> {
    match run_stdio(DemoHandler::default()) {
        Ok(()) => Ok(SUCCESS),
        // The host dropped our stdin between requests: normal shutdown.
        Err(WorkerError::UnexpectedEofWhileWaitingForRequest) => Ok(SUCCESS),
        Err(err) => Err(CliError::new(
            FAILURE,
            format!("worker loop failed: {err}"),
        )),
    }
}

#[derive(Default)]
struct DemoHandler {
    requests_handled: u64,
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

impl MessageHandler for DemoHandler {
    fn handle_request(
        &mut self,
        payload: &[u8],
        response: &mut ResponseSink,
    ) -> Result<Flow, HandlerError> {
        self.requests_handled += 1;
        let text = String::from_utf8_lossy(payload);

        if text == "exit" {
            write!(response, "exiting")?;
            return Ok(Flow::Exit);
        }
        if let Some(rest) = text.strip_prefix("exit-text-") {
            // Only the first line counts; a trailing newline is not part
            // of the farewell text.
            let line = rest.split('\n').next().unwrap_or_default();
            write!(response, "{line}")?;
            return Ok(Flow::Exit);
        }
        if text == "exit-silent" {
            return Ok(Flow::Exit);
        }
        if text == "fail" {
            return Err("simulated handler failure".into());
        }
        if text == "req-count" {
            write!(response, "{}", self.requests_handled)?;
            return Ok(Flow::Continue);
        }
        if text == "error-late-stdout" {
            // Stray-output scenario: stderr now, unframed stdout after the
            // response frame has long been flushed.
            eprint!("Error, then sleep.");
            thread::spawn(|| {
                thread::sleep(Duration::from_millis(150));
                println!("Done sleep");
                let _ = std::io::stdout().flush();
            });
            return Ok(Flow::Continue);
        }

        if let Some(rest) = text.strip_prefix("Sleep ") {
            if let Ok(secs) = rest.parse::<f64>() {
                thread::sleep(Duration::from_secs_f64(secs));
            }
        }

        if let Some(rest) = text.strip_prefix("ErrorOnly") {
            eprintln!("ErrorOnly-{}", md5_hex(rest.as_bytes()));
            return Ok(Flow::Continue);
        }
        if text.starts_with("Error") {
            eprintln!("Error-{}", md5_hex(payload));
        }

        if text.starts_with("echo") {
            response.write_all(payload)?;
        } else if text.starts_with("stderr echo") {
            std::io::stderr().write_all(payload)?;
        } else {
            write!(response, "{}", md5_hex(payload))?;
        }
        Ok(Flow::Continue)
    }

    fn handle_exit(&mut self) {}
}
