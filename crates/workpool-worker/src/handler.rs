use std::io::{self, Write};

/// Error type a request handler may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What the message loop should do after a request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the loop alive and wait for the next request.
    Continue,
    /// Flush the framed response, then let the worker process terminate.
    ///
    /// Handlers must use this instead of calling `std::process::exit`
    /// directly, so the response captured so far still reaches the host.
    Exit,
}

/// The scoped capture region for one request's response.
///
/// Everything written here becomes the payload of exactly one framed
/// response on the worker's stdout, flushed when the handler returns —
/// normally or with an error.
#[derive(Debug, Default)]
pub struct ResponseSink {
    buf: Vec<u8>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes captured so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the sink, yielding the captured response payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for ResponseSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The contract a worker process supplies to the message loop.
///
/// At most one request is in flight at a time, so implementations are free
/// to keep per-process state in `&mut self` — that state survives across
/// requests for as long as the host keeps reusing the process.
pub trait MessageHandler {
    /// Handle one request payload, writing the response into `response`.
    ///
    /// Returning an error does not kill the loop: the error is reported on
    /// stderr and whatever was captured so far is still framed back to the
    /// host, keeping the wire in sync.
    fn handle_request(&mut self, payload: &[u8], response: &mut ResponseSink)
        -> Result<Flow, HandlerError>;

    /// Handle a host-initiated exit frame. Called once; the loop stops
    /// afterwards. Typical implementations release resources and return
    /// (or terminate the process themselves).
    fn handle_exit(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_collects_writes() {
        let mut sink = ResponseSink::new();
        sink.write_all(b"part one, ").unwrap();
        write!(sink, "part {}", 2).unwrap();

        assert_eq!(sink.as_bytes(), b"part one, part 2");
        assert_eq!(sink.into_bytes(), b"part one, part 2".to_vec());
    }

    #[test]
    fn sink_starts_empty() {
        let sink = ResponseSink::new();
        assert!(sink.as_bytes().is_empty());
    }
}
