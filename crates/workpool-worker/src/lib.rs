//! Child-side message loop for pooled worker processes.
//!
//! A worker process links this crate, supplies a [`MessageHandler`], and
//! hands control to [`WorkerRuntime::run`] (or the [`run_stdio`] shortcut).
//! The loop decodes framed start requests from stdin, captures everything
//! the handler writes into a [`ResponseSink`], and flushes the capture back
//! to stdout as a single framed response — on every exit path, including a
//! failing handler and a handler that asks to terminate the process.

pub mod error;
pub mod handler;
pub mod runtime;

pub use error::{Result, WorkerError};
pub use handler::{Flow, HandlerError, MessageHandler, ResponseSink};
pub use runtime::{run_stdio, WorkerRuntime};
