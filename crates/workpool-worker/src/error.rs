use workpool_frame::FrameError;

/// Errors that terminate a worker's message loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Stdin closed cleanly between frames. This is the harmless "no more
    /// work" shutdown path, distinct from losing the host mid-frame.
    #[error("stdin closed while waiting for a request")]
    UnexpectedEofWhileWaitingForRequest,

    /// Stdin closed after part of a frame had already arrived.
    #[error("stdin closed in the middle of a frame")]
    UnexpectedEof,

    /// The incoming byte stream violated the framing protocol.
    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    /// An I/O error on stdin or stdout.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
