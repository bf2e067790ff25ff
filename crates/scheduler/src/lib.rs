//! Scheduler
//!
//! Runs flow through per-tenant FIFO queues to workers. The queue registry
//! is the shared coordination point: a map of active queues plus a pub/sub
//! channel announcing new ones, so workers attach to tenants dynamically
//! without restarts. Per-tenant isolation comes from the queue topology;
//! machine-level concurrency is the worker's own cap.

pub mod queue;
pub mod worker;

pub use queue::{Job, QueueRegistry};
pub use worker::{MachineContext, ResultSink, Worker, WorkerDeps};

use thiserror::Error;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("queue is full for tenant {0}")]
    QueueFull(String),

    #[error("queue closed: {0}")]
    QueueClosed(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] voiceci_persistence::PersistenceError),

    #[error("machine error: {0}")]
    Machine(#[from] voiceci_machine::MachineError),
}
