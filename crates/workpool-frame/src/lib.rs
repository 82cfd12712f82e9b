//! Length-prefixed request/response framing for pooled worker processes.
//!
//! Two message kinds travel host → worker over the worker's stdin:
//! - start request: `"<START>;<N>\n"` followed by exactly N payload bytes
//! - exit: `"<EXIT>;\n"`
//!
//! One kind travels worker → host over the worker's stdout:
//! - response: `"<N>;"` followed by exactly N payload bytes
//!
//! The numeric length is authoritative, so payloads need no escaping:
//! arbitrary bytes — including text that looks like another frame — pass
//! through untouched. Stderr is deliberately outside this scheme; it is
//! free-form and never framed.

pub mod codec;
pub mod error;

pub use codec::{
    decode_request, decode_response, encode_exit, encode_response, encode_start_request, Request,
    MAX_PAYLOAD, MSG_EXIT, MSG_START_REQUEST,
};
pub use error::{FrameError, Result};
