//! Bounded pool of reusable worker subprocesses with framed pipe I/O.
//!
//! A [`ProcessPool`] owns a warm set of long-lived child processes, each
//! speaking the length-prefixed request/response protocol from
//! `workpool-frame` over its stdin/stdout, with free-form stderr on the
//! side. Callers check a [`PoolWorker`] out, send one request at a time,
//! poll or block for the response, and check the worker back in; the pool
//! decides whether to keep it warm, retire it, or replace it.
//!
//! There is no background thread: a single thread of control drives the
//! pool and every handle. Concurrency across workers comes from the caller
//! holding several checked-out handles and multiplexing them with the
//! non-blocking readiness probes (`has_stdout_data`, `has_stderr_data`,
//! `wait_for_stdout_or_stderr`).
//!
//! Unix only: readiness probes are built on `poll(2)`.

pub mod error;
mod pipe;
pub mod pool;
pub mod worker;

pub use error::{PoolError, Result};
pub use pool::{PoolConfig, ProcessPool};
pub use worker::{PoolWorker, WorkerCommand};
