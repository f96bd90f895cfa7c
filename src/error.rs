//! Error types for the job system.

use thiserror::Error;

/// Errors surfaced by [`crate::JobSystem`] construction and shutdown.
#[derive(Error, Debug)]
pub enum Error {
    /// Spawning a worker thread failed.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// One or more worker threads panicked while running jobs.
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}

/// Convenient result type alias.
pub type Result<T> = std::result::Result<T, Error>;
