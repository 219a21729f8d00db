//! The `render` module turns chat state into JPEG frames out of process.
//!
//! - `job`: the request sent to a worker
//! - `framing`: how a worker's answer is delimited on its stdout
//! - `pool`: the bounded set of worker processes behind `render(job)`
//! - `worker` / `canvas`: what runs inside each worker process

pub mod canvas;
pub mod framing;
pub mod job;
pub mod pool;
pub mod worker;

pub use job::{Instruction, RenderJob};
pub use pool::{RenderWorkerPool, WorkerCommand};
