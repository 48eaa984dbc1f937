//! Bounded thread pool for fan-out stage execution.

mod worker;

pub use worker::WorkerPool;
