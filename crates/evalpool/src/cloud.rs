//! Remote evaluation cache (lichess cloud-eval compatible).
//!
//! Lookups are best effort: a miss, a shallow entry, a slow or failing
//! server and a malformed body all come back as `None`.

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::CloudConfig;
use crate::error::EvalResult;
use crate::rate_limit::RateLimiter;
use crate::types::{parse_move_token, Evaluation, Position, Score, Source};

/// Something that may already know a position's evaluation.
pub trait CloudLookup: Send + Sync {
    /// An evaluation searched to at least `min_depth`, or `None`.
    fn lookup(&self, position: &Position, min_depth: u32) -> Option<Evaluation>;
}

#[derive(Debug, Deserialize)]
pub struct CloudEvalPayload {
    pub depth: u32,
    #[serde(default)]
    pub knodes: Option<u64>,
    #[serde(default)]
    pub pvs: Vec<CloudPv>,
}

#[derive(Debug, Deserialize)]
pub struct CloudPv {
    #[serde(default)]
    pub moves: String,
    #[serde(default)]
    pub cp: Option<i32>,
    #[serde(default)]
    pub mate: Option<i32>,
}

impl CloudEvalPayload {
    /// Only the first variation is used.
    pub fn into_evaluation(self, position: Position, min_depth: u32) -> Option<Evaluation> {
        if self.depth < min_depth {
            log::debug!(
                "cloud entry for {position} too shallow ({} < {min_depth})",
                self.depth
            );
            return None;
        }
        let pv = self.pvs.into_iter().next()?;
        let score = match (pv.mate, pv.cp) {
            (Some(n), _) => Score::Mate(n),
            (None, Some(cp)) => Score::Centipawns(cp),
            (None, None) => return None,
        };
        let best_move = pv.moves.split_whitespace().next().and_then(parse_move_token);
        Some(Evaluation {
            position,
            score,
            depth: self.depth,
            best_move,
            source: Source::Cloud,
        })
    }
}

pub struct CloudClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
    limiter: RateLimiter,
}

impl CloudClient {
    pub fn new(cfg: &CloudConfig) -> EvalResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("evalpool/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            timeout: cfg.timeout(),
            limiter: RateLimiter::new(cfg.max_per_window, cfg.window()),
        })
    }

    fn fetch(&self, position: &Position, budget: Duration) -> reqwest::Result<CloudEvalPayload> {
        self.http
            .get(&self.endpoint)
            .query(&[("fen", position.as_str()), ("multiPv", "1")])
            .timeout(budget)
            .send()?
            .error_for_status()?
            .json::<CloudEvalPayload>()
    }
}

impl CloudLookup for CloudClient {
    fn lookup(&self, position: &Position, min_depth: u32) -> Option<Evaluation> {
        // 待ち行列で過ごした時間もタイムアウトに含める
        let started = Instant::now();
        let fetched = self.limiter.throttle_within(self.timeout, || {
            self.fetch(position, self.timeout.saturating_sub(started.elapsed()))
        });
        match fetched {
            None => {
                log::debug!("cloud lookup for {position} dropped: rate limit queue too long");
                None
            }
            Some(Err(e)) => {
                log::debug!("cloud lookup for {position} failed: {e}");
                None
            }
            Some(Ok(payload)) => {
                log::debug!(
                    "cloud entry for {position}: depth {} knodes {}",
                    payload.depth,
                    payload.knodes.unwrap_or(0)
                );
                payload.into_evaluation(position.clone(), min_depth)
            }
        }
    }
}
