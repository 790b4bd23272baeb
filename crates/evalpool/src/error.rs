//! Error types for the evaluation service
//!
//! None of these cross [`HybridEvaluator::evaluate`](crate::HybridEvaluator::evaluate);
//! they are downgraded to the unanalyzed sentinel there.

use std::time::Duration;

/// Errors raised below the public evaluation entry point
#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    /// The engine binary could not be started
    #[error("failed to spawn engine at {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine did not finish the `uci` / `isready` handshake in time
    #[error("{label}: engine handshake timed out after {timeout:?}")]
    HandshakeTimeout { label: String, timeout: Duration },

    /// A protocol exchange exceeded its ceiling
    #[error("{label}: analysis timed out after {timeout:?}")]
    AnalysisTimeout { label: String, timeout: Duration },

    /// The engine closed its stdout (process exited or crashed)
    #[error("{0}: engine exited unexpectedly")]
    EngineExited(String),

    /// No engine handle became ready during initialization
    #[error("engine pool is unavailable")]
    PoolUnavailable,

    /// The pool was shut down and must be re-initialized before use
    #[error("engine pool has been shut down")]
    PoolShutDown,

    /// No handle was released back within the acquire timeout
    #[error("timed out after {0:?} waiting for a free engine")]
    AcquireTimeout(Duration),

    /// A position string that cannot be sent over a line protocol
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// HTTP client construction error
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Pipe I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;
