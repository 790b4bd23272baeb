//! Cloud-first, engine-second evaluation.
//!
//! [`HybridEvaluator::evaluate`] always returns an [`Evaluation`]. When no
//! analysis could be done it is the unanalyzed sentinel (`depth == 0`,
//! [`Score::Unanalyzed`](crate::Score::Unanalyzed)); failures are counted in
//! [`Stats`] and logged, never returned.

use std::sync::Arc;
use std::thread;

use crossbeam_channel as chan;

use crate::cloud::{CloudClient, CloudLookup};
use crate::config::ServiceConfig;
use crate::error::EvalResult;
use crate::pool::{EnginePool, PoolState};
use crate::stats::{Stats, StatsSnapshot};
use crate::types::{Evaluation, Position, Source};

/// Per-call overrides. `None` fields use the service configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvalOptions {
    pub use_cloud: Option<bool>,
    pub local_depth: Option<u32>,
    pub min_cloud_depth: Option<u32>,
}

impl EvalOptions {
    pub fn local_only() -> Self {
        Self {
            use_cloud: Some(false),
            ..Self::default()
        }
    }
}

/// 進捗コールバック: (完了数, 総数)
pub type ProgressCallback<'a> = dyn FnMut(usize, usize) + 'a;

pub struct HybridEvaluator {
    pool: Arc<EnginePool>,
    cloud: Option<Arc<dyn CloudLookup>>,
    stats: Arc<Stats>,
    cloud_by_default: bool,
    local_depth: u32,
    min_cloud_depth: u32,
}

impl HybridEvaluator {
    pub fn new(
        pool: Arc<EnginePool>,
        cloud: Option<Arc<dyn CloudLookup>>,
        cfg: &ServiceConfig,
    ) -> Self {
        Self {
            cloud_by_default: cfg.cloud.enabled && cloud.is_some(),
            pool,
            cloud,
            stats: Arc::new(Stats::default()),
            local_depth: cfg.search.local_depth,
            min_cloud_depth: cfg.cloud.min_depth,
        }
    }

    /// Real engine processes plus the HTTP cloud client when enabled.
    /// Nothing is spawned until the first local evaluation.
    pub fn from_config(cfg: &ServiceConfig) -> EvalResult<Self> {
        let pool = Arc::new(EnginePool::from_config(cfg));
        let cloud: Option<Arc<dyn CloudLookup>> = if cfg.cloud.enabled {
            Some(Arc::new(CloudClient::new(&cfg.cloud)?))
        } else {
            None
        };
        Ok(Self::new(pool, cloud, cfg))
    }

    /// Share counters with other evaluators.
    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn evaluate(&self, position: &Position, options: &EvalOptions) -> Evaluation {
        self.stats.record_request();

        if options.use_cloud.unwrap_or(self.cloud_by_default) {
            let min_depth = options.min_cloud_depth.unwrap_or(self.min_cloud_depth);
            let hit = self
                .cloud
                .as_ref()
                .and_then(|cloud| cloud.lookup(position, min_depth))
                .filter(|eval| eval.depth >= min_depth);
            if let Some(eval) = hit {
                self.stats.record_cache_hit();
                return eval;
            }
        }

        // 可用性はプールのライフサイクルごとに一度だけ調べる
        if !self.pool.ensure_initialized() {
            return Evaluation::unanalyzed(position.clone());
        }

        let depth = options.local_depth.unwrap_or(self.local_depth);
        match self.analyse_locally(position, depth) {
            Ok(eval) => {
                self.stats.record_local_fallback();
                eval
            }
            Err(e) => {
                self.stats.record_error();
                log::warn!("local analysis failed for {position}: {e}");
                Evaluation::unanalyzed(position.clone())
            }
        }
    }

    fn analyse_locally(&self, position: &Position, depth: u32) -> EvalResult<Evaluation> {
        // lease の drop でエラー時も必ずプールへ返却される
        let mut lease = self.pool.acquire()?;
        let outcome = lease.analyse(position, depth)?;
        Ok(Evaluation {
            position: position.clone(),
            score: outcome.score,
            depth: outcome.depth,
            best_move: outcome.best_move,
            source: Source::Local,
        })
    }

    /// Evaluate many positions concurrently, at most pool-capacity at a time.
    ///
    /// Results come back in input order; `progress` is called on the calling
    /// thread after every completed item.
    pub fn evaluate_batch(
        &self,
        positions: &[Position],
        options: &EvalOptions,
        mut progress: Option<&mut ProgressCallback<'_>>,
    ) -> Vec<Evaluation> {
        let total = positions.len();
        if total == 0 {
            return Vec::new();
        }
        // 使えないプールに対して並列化しても意味がない
        let workers = match self.pool.status().state {
            PoolState::Unavailable | PoolState::ShutDown => 1,
            PoolState::Uninitialized | PoolState::Ready => self.pool.capacity().min(total),
        };
        let mut results: Vec<Option<Evaluation>> = vec![None; total];

        thread::scope(|s| {
            let (job_tx, job_rx) = chan::unbounded::<usize>();
            for i in 0..total {
                let _ = job_tx.send(i);
            }
            drop(job_tx);

            let (done_tx, done_rx) = chan::unbounded::<(usize, Evaluation)>();
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    for i in job_rx.iter() {
                        let eval = self.evaluate(&positions[i], options);
                        if done_tx.send((i, eval)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut completed = 0;
            for (i, eval) in done_rx.iter() {
                results[i] = Some(eval);
                completed += 1;
                if let Some(cb) = progress.as_mut() {
                    cb(completed, total);
                }
            }
        });

        results
            .into_iter()
            .zip(positions)
            .map(|(eval, pos)| eval.unwrap_or_else(|| Evaluation::unanalyzed(pos.clone())))
            .collect()
    }

    /// Terminate the engine processes. Local analysis is unavailable until
    /// the pool is initialized again.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
