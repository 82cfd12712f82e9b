/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A byte violated the framing grammar (non-digit in a numeric prefix,
    /// an empty prefix, or a length that does not fit in `usize`).
    #[error("malformed frame prefix (expected decimal digits before delimiter)")]
    UnexpectedMessage,

    /// The message-type code is not one this protocol defines.
    #[error("unknown message type {code}")]
    UnknownMessageType { code: u64 },

    /// The declared payload length exceeds the sanity cap.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
