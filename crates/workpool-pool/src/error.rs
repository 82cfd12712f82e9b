use workpool_frame::FrameError;

/// Errors that can occur in pool and worker-handle operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Admission control rejected the checkout: every worker slot is
    /// already running. Recoverable — release a worker and retry.
    #[error("process pool exhausted")]
    PoolExhausted,

    /// The released handle is not tracked as running by this pool.
    #[error("process is not currently tracked as running by this pool")]
    InvalidProcess,

    /// The operation targeted a handle whose process is already closed or
    /// marked failed.
    #[error("worker process already closed or marked failed")]
    ResourceFailed,

    /// A pipe closed while a response frame was only partially received.
    #[error("worker pipe closed mid-frame")]
    UnexpectedEof,

    /// The worker's stdout violated the framing protocol.
    #[error("unexpected message from worker: {0}")]
    UnexpectedMessage(#[from] FrameError),

    /// A recycled worker had buffered output before any request was sent.
    /// Carries the stray lines from both channels for diagnostics.
    #[error("worker produced output before a request was started ({} stdout line(s), {} stderr line(s))", stdout_lines.len(), stderr_lines.len())]
    OutputBeforeStarting {
        stdout_lines: Vec<String>,
        stderr_lines: Vec<String>,
    },

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),

    /// Spawning a worker process failed.
    #[error("failed to spawn worker `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Writing a frame to a worker's stdin failed.
    #[error("worker stdin write failed: {0}")]
    Write(std::io::Error),

    /// An I/O error on one of the worker's pipes.
    #[error("worker pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
