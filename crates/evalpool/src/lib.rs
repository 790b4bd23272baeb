//! 局面評価サービス
//!
//! A remote evaluation cache is consulted first; on a miss the position is
//! searched by one of a bounded pool of long-lived UCI engine processes.
//! [`HybridEvaluator::evaluate`] never fails: when no analysis is possible it
//! returns the unanalyzed sentinel ([`Evaluation::unanalyzed`]).

pub mod cloud;
pub mod config;
pub mod engine;
pub mod error;
pub mod hybrid;
pub mod pool;
pub mod rate_limit;
pub mod stats;
pub mod types;

#[cfg(test)]
mod test_support;

pub use cloud::{CloudClient, CloudLookup};
pub use config::ServiceConfig;
pub use engine::{EngineHandle, EngineLauncher, ProcessLauncher};
pub use error::{EvalError, EvalResult};
pub use hybrid::{EvalOptions, HybridEvaluator};
pub use pool::{EngineLease, EnginePool, PoolState, PoolStatus};
pub use rate_limit::RateLimiter;
pub use stats::{Stats, StatsSnapshot};
pub use types::{Evaluation, Position, Score, Source};
