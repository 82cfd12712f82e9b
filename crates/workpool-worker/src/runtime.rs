use std::io::{self, ErrorKind, Read, Write};

use bytes::BytesMut;
use tracing::debug;
use workpool_frame::{decode_request, encode_response, Request};

use crate::error::{Result, WorkerError};
use crate::handler::{Flow, MessageHandler, ResponseSink};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// The worker-side message loop.
///
/// Generic over the byte streams so the loop can be driven from in-memory
/// buffers in tests; production workers use [`run_stdio`].
pub struct WorkerRuntime<H, R, W> {
    handler: H,
    input: R,
    output: W,
    buf: BytesMut,
}

impl<H: MessageHandler, R: Read, W: Write> WorkerRuntime<H, R, W> {
    pub fn new(handler: H, input: R, output: W) -> Self {
        Self {
            handler,
            input,
            output,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Run the message loop until an exit frame arrives, the handler asks
    /// to terminate, or the protocol breaks.
    ///
    /// `Err(WorkerError::UnexpectedEofWhileWaitingForRequest)` means the
    /// host closed stdin between frames; callers usually treat that as a
    /// normal shutdown.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.next_request()? {
                Request::Exit => {
                    debug!("exit frame received");
                    self.handler.handle_exit();
                    return Ok(());
                }
                Request::Start(payload) => {
                    debug!(len = payload.len(), "request frame received");
                    if self.dispatch(&payload)? == Flow::Exit {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Consume the runtime, returning the handler and both streams.
    pub fn into_parts(self) -> (H, R, W) {
        (self.handler, self.input, self.output)
    }

    /// Invoke the handler inside a capture region and flush the capture as
    /// one framed response, whether the handler succeeded or not.
    fn dispatch(&mut self, payload: &[u8]) -> Result<Flow> {
        let mut sink = ResponseSink::new();
        let flow = match self.handler.handle_request(payload, &mut sink) {
            Ok(flow) => flow,
            Err(err) => {
                // Stderr is the protocol's unframed error channel; the host
                // drains it with get_stderr_response.
                eprintln!("request handler failed: {err}");
                Flow::Continue
            }
        };

        let body = sink.into_bytes();
        let mut frame = BytesMut::new();
        encode_response(&body, &mut frame)?;
        self.write_all(&frame)?;
        self.flush()?;
        Ok(flow)
    }

    fn next_request(&mut self) -> Result<Request> {
        loop {
            if let Some(request) = decode_request(&mut self.buf)? {
                return Ok(request);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.input.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WorkerError::Io(err)),
            };

            if read == 0 {
                return Err(if self.buf.is_empty() {
                    WorkerError::UnexpectedEofWhileWaitingForRequest
                } else {
                    WorkerError::UnexpectedEof
                });
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.output.write(bytes) {
                Ok(0) => {
                    return Err(WorkerError::Io(io::Error::new(
                        ErrorKind::WriteZero,
                        "stdout closed while writing response frame",
                    )))
                }
                Ok(n) => bytes = &bytes[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WorkerError::Io(err)),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.output.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WorkerError::Io(err)),
            }
        }
    }
}

/// Run `handler` over the process's real stdin/stdout.
pub fn run_stdio<H: MessageHandler>(handler: H) -> Result<()> {
    let stdin = io::stdin().lock();
    // Use the unlocked handle: holding the stdout lock for the runtime's
    // lifetime would block any other thread in the worker that writes to
    // stdout (the stray-output scenario depends on such writes landing).
    let stdout = io::stdout();
    WorkerRuntime::new(handler, stdin, stdout).run()
}
