//! Umbrella crate: one dependency pulls in the framing codec, the
//! child-side worker runtime, and the host-side process pool.

pub use workpool_frame as frame;
pub use workpool_pool as pool;
pub use workpool_worker as worker;

pub use workpool_pool::{PoolConfig, PoolError, PoolWorker, ProcessPool, WorkerCommand};
pub use workpool_worker::{
    run_stdio, Flow, HandlerError, MessageHandler, ResponseSink, WorkerError, WorkerRuntime,
};
