use thiserror::Error;

use crate::request::Operation;

/// Errors that prevent a phase from running to completion.
///
/// Failures of individual requests are never reported here; they are part of the
/// [`PhaseResult`](crate::PhaseResult).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker pool was started without any backend to talk to.
    #[error("at least one backend is required")]
    NoBackends,

    /// The worker pool was started without workers.
    #[error("at least one worker is required")]
    NoWorkers,

    /// A write phase was requested but no payload was generated.
    #[error("cannot run {0} phase without a payload")]
    MissingPayload(Operation),

    /// All workers exited before the phase collected every response.
    #[error("worker pool closed after {collected} of {expected} {operation} responses")]
    PoolClosed {
        /// The phase that was running.
        operation: Operation,
        /// Number of responses received before the pool closed.
        collected: usize,
        /// Number of responses the phase was waiting for.
        expected: usize,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
