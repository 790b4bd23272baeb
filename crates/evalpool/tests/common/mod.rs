//! Shared helpers for the integration tests

#![allow(dead_code)]

use evalpool::ServiceConfig;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
pub const ITALIAN_FEN: &str = "r1bqk1nr/pppp1ppp/2n5/2b1p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4";

/// Minimal UCI engine written in POSIX sh.
pub const SHELL_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci)
      echo "id name shell-engine"
      echo "option name Hash type spin default 16 min 1 max 1024"
      echo "uciok" ;;
    isready) echo "readyok" ;;
    go*)
      echo "info depth 3 score cp 21 pv g1f3"
      echo "info string thinking"
      echo "info depth 5 seldepth 7 score cp 27 nodes 1200 pv e2e4 e7e5"
      echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Same handshake, but the process dies on the first search.
pub const CRASHING_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) exit 3 ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Stops reading its input as soon as a search starts.
pub const WEDGED_ENGINE: &str = r#"
while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) sleep 5 ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Local-only configuration running `script` under `/bin/sh -c`.
pub fn shell_config(script: &str, pool_size: usize) -> ServiceConfig {
    let mut cfg = ServiceConfig::default();
    cfg.engine.path = "/bin/sh".into();
    cfg.engine.args = vec!["-c".to_string(), script.to_string()];
    cfg.engine.init_timeout_ms = 5_000;
    cfg.engine.analysis_timeout_ms = 5_000;
    cfg.pool.size = pool_size;
    cfg.cloud.enabled = false;
    cfg
}
