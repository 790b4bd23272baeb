//! evalpool: evaluate chess positions through the cloud cache and a local
//! UCI engine pool, one JSON object per position on stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use evalpool::{EvalOptions, HybridEvaluator, Position, ServiceConfig};

/// 進捗ログの間隔
const PROGRESS_EVERY: usize = 10;

#[derive(Parser, Debug)]
#[command(author, version, about = "Evaluate positions via cloud cache + local UCI engines", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine binary (overrides the config file and EVALPOOL_ENGINE_PATH)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Number of engine processes
    #[arg(long)]
    pool_size: Option<usize>,

    /// Local search depth
    #[arg(long)]
    depth: Option<u32>,

    /// Skip the cloud cache
    #[arg(long, default_value_t = false)]
    no_cloud: bool,

    /// Minimum depth accepted from the cloud cache
    #[arg(long)]
    min_cloud_depth: Option<u32>,

    /// One FEN per line; blank lines and `#` comments are skipped
    #[arg(long)]
    input: Option<PathBuf>,

    /// Positions in FEN notation (quote each one)
    fens: Vec<String>,
}

impl Cli {
    fn service_config(&self) -> Result<ServiceConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServiceConfig::load(path)?,
            None => {
                let mut cfg = ServiceConfig::default();
                cfg.apply_env();
                cfg
            }
        };
        if let Some(engine) = &self.engine {
            cfg.engine.path = engine.clone();
        }
        if let Some(size) = self.pool_size {
            cfg.pool.size = size;
        }
        if let Some(depth) = self.depth {
            cfg.search.local_depth = depth;
        }
        if let Some(depth) = self.min_cloud_depth {
            cfg.cloud.min_depth = depth;
        }
        if self.no_cloud {
            cfg.cloud.enabled = false;
        }
        Ok(cfg)
    }

    fn positions(&self) -> Result<Vec<Position>> {
        let mut positions = Vec::new();
        for fen in &self.fens {
            positions.push(Position::new(fen.as_str()).with_context(|| format!("bad FEN {fen:?}"))?);
        }
        if let Some(path) = &self.input {
            let file = File::open(path)
                .with_context(|| format!("failed to open input {}", path.display()))?;
            for (idx, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let position = Position::new(line)
                    .with_context(|| format!("{}:{}: bad FEN", path.display(), idx + 1))?;
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let cfg = cli.service_config()?;
    let positions = cli.positions()?;
    if positions.is_empty() {
        bail!("no positions given (pass FENs or --input FILE)");
    }

    let evaluator = HybridEvaluator::from_config(&cfg).context("failed to set up evaluator")?;
    log::info!(
        "evaluating {} positions: engine={} pool={} depth={} cloud={}",
        positions.len(),
        cfg.engine.path.display(),
        cfg.pool.size,
        cfg.search.local_depth,
        cfg.cloud.enabled
    );

    let mut on_progress = |done: usize, total: usize| {
        if done % PROGRESS_EVERY == 0 || done == total {
            log::info!("progress {done}/{total}");
        }
    };
    let evals =
        evaluator.evaluate_batch(&positions, &EvalOptions::default(), Some(&mut on_progress));
    evaluator.shutdown();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for eval in &evals {
        serde_json::to_writer(&mut out, eval)?;
        writeln!(out)?;
    }
    out.flush()?;

    eprintln!("{}", serde_json::to_string(&evaluator.stats_snapshot())?);
    Ok(())
}
